#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The evaluator verdict was `fail` in a single-request execution.
    EvaluationFailed = 1,

    /// Bad input: CLI misuse, parse errors, compile errors, invalid IR.
    InvalidInput = 2,

    /// The run itself failed: setup error, IO, runtime invariants.
    RuntimeError = 3,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
