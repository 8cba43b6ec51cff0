/// Error taxonomy of the engine. Codes are stable; messages are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LixErrorCode {
    Parse,
    Binding,
    Planner,
    PrivateTableAccess,
    Lowering,
    Backend,
    Plugin,
    Invariant,
    Closed,
    PostCommitEffect,
}

impl LixErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Binding => "binding",
            Self::Planner => "planner",
            Self::PrivateTableAccess => "private_table_access",
            Self::Lowering => "lowering",
            Self::Backend => "backend",
            Self::Plugin => "plugin",
            Self::Invariant => "invariant",
            Self::Closed => "closed",
            Self::PostCommitEffect => "post_commit_effect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LixError {
    pub code: LixErrorCode,
    pub message: String,
}

impl LixError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Parse, message)
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Binding, message)
    }

    pub fn planner(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Planner, message)
    }

    pub fn private_table_access(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::PrivateTableAccess, message)
    }

    pub fn lowering(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Lowering, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Backend, message)
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Plugin, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Invariant, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::Closed, message)
    }

    pub fn post_commit_effect(message: impl Into<String>) -> Self {
        Self::new(LixErrorCode::PostCommitEffect, message)
    }

    fn new(code: LixErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LixError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for LixError {}
