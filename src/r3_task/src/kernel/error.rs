//! Error types
use core::fmt;

/// All result codes (including success) that task operations can produce.
///
/// The error codes are matched to their closest equivalents in μITRON4.0.
/// Every per-operation error type converts into the `ResultCode` of the same
/// name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i8)]
pub enum ResultCode {
    /// The operation was successful. No additional information is available.
    Success = 0,
    /// The current context disallows the operation.
    BadContext = -25,
    /// The kernel could not allocate the memory needed for the operation.
    ResourceExhaustion = -33,
    /// A target object is in a state that disallows the operation.
    BadObjectState = -41,
}

impl ResultCode {
    /// Get the short name of the result code.
    ///
    /// # Examples
    ///
    /// ```
    /// use r3_task::kernel::ResultCode;
    /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
    /// ```
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::BadContext => "BadContext",
            Self::ResourceExhaustion => "ResourceExhaustion",
            Self::BadObjectState => "BadObjectState",
        }
    }

    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub const fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub const fn is_ok(self) -> bool {
        !self.is_err()
    }
}

impl fmt::Debug for ResultCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Define an error type whose variants are a subset of [`ResultCode`]'s.
macro_rules! define_error {
    (
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident in $test_mod:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)?
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                $vname
            ),*
        }

        impl $name {
            /// Get the equivalent [`ResultCode`].
            #[inline]
            pub const fn result_code(self) -> ResultCode {
                match self {
                    $( Self::$vname => ResultCode::$vname ),*
                }
            }
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.result_code().fmt(f)
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                x.result_code()
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                x.err().map_or(Self::Success, $name::result_code)
            }
        }

        #[cfg(test)]
        mod $test_mod {
            use super::*;

            #[test]
            fn converts_to_result_code() {
                $(
                    let code = ResultCode::from($name::$vname);
                    assert!(code.is_err());
                    assert_eq!(code.as_str(), stringify!($vname));
                    assert_eq!(ResultCode::from(Err($name::$vname)), code);
                )*
                assert_eq!(
                    ResultCode::from(Result::<(), $name>::Ok(())),
                    ResultCode::Success,
                );
            }

            #[test]
            fn debug_matches_result_code() {
                $(
                    assert_eq!(format!("{:?}", $name::$vname), stringify!($vname));
                )*
            }
        }
    };
}

define_error! {
    /// Error type for [`Task::new`] and [`TaskObject::new`].
    ///
    /// [`Task::new`]: super::Task::new
    /// [`TaskObject::new`]: super::TaskObject::new
    pub enum CreateTaskError in create_task_error {
        /// The kernel could not allocate the task's control block or stack.
        ResourceExhaustion,
    }
}

define_error! {
    /// Error type for [`Task::priority`].
    ///
    /// [`Task::priority`]: super::TaskMethods::priority
    pub enum GetTaskPriorityError in get_task_priority_error {
        /// The current context is an interrupt context.
        BadContext,
        /// The task has already terminated itself.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`Task::set_priority`].
    ///
    /// [`Task::set_priority`]: super::TaskMethods::set_priority
    pub enum SetTaskPriorityError in set_task_priority_error {
        /// The current context is an interrupt context.
        BadContext,
        /// The task has already terminated itself.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`Task::suspend`].
    ///
    /// [`Task::suspend`]: super::TaskMethods::suspend
    pub enum SuspendTaskError in suspend_task_error {
        /// The current context is an interrupt context.
        BadContext,
        /// The task has already terminated itself.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`Task::resume`] and [`Task::resume_from_isr`].
    ///
    /// [`Task::resume`]: super::TaskMethods::resume
    /// [`Task::resume_from_isr`]: super::TaskMethods::resume_from_isr
    pub enum ResumeTaskError in resume_task_error {
        /// `resume` was called from an interrupt context, or
        /// `resume_from_isr` was called from outside one.
        BadContext,
        /// The task has already terminated itself.
        BadObjectState,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_code_sign() {
        assert!(ResultCode::Success.is_ok());
        assert!(ResultCode::BadContext.is_err());
        assert!(ResultCode::ResourceExhaustion.is_err());
        assert!(ResultCode::BadObjectState.is_err());
    }

    #[test]
    fn result_code_values() {
        assert_eq!(ResultCode::BadContext as i8, -25);
        assert_eq!(ResultCode::ResourceExhaustion as i8, -33);
        assert_eq!(ResultCode::BadObjectState as i8, -41);
    }
}
