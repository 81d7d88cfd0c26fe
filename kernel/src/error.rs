//! Kernel error values.
//!
//! Fallible kernel operations return `Result<T, &'static KernelError>`.
//! Every error is a statically allocated singleton declared by the module
//! that raises it, so raising an error never allocates. Some of these fire
//! before the heap exists.

use core::fmt;

/// A module-tagged kernel error.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelError {
    /// Name of the module that raised the error.
    pub module: &'static str,
    /// What went wrong.
    pub message: &'static str,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ERR_A: KernelError = KernelError {
        module: "mod_a",
        message: "first failure",
    };
    static ERR_B: KernelError = KernelError {
        module: "mod_b",
        message: "second failure",
    };

    #[test]
    fn display_includes_module_tag() {
        assert_eq!(format!("{}", ERR_A), "mod_a: first failure");
    }

    #[test]
    fn singletons_compare_by_identity() {
        let first: &'static KernelError = &ERR_A;
        let second: &'static KernelError = &ERR_A;
        assert!(core::ptr::eq(first, second));
        assert_eq!(first, second);
        assert_ne!(&ERR_A, &ERR_B);
    }
}
