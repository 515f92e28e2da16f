//! Exception handling scopes.
//!
//! Every block belongs to exactly one scope: the method body itself, a protected (`try`)
//! region, or a handler region. Scopes nest through their parent link. Cleaning never merges
//! blocks across scopes, and the serialization layout computed by repartitioning keeps each
//! scope contiguous.

use std::fmt;

use crate::analysis::cfg::BlockId;

/// Handle of a scope inside a [`crate::analysis::cfg::MethodBody`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub(crate) usize);

impl ScopeId {
    /// The scope of the method body itself.
    pub const ROOT: ScopeId = ScopeId(0);

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Kind of exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Typed catch clause; starts with the exception object on the stack
    Catch,
    /// Filter expression; starts with the exception object on the stack. The handler
    /// guarded by the filter is a separate [`HandlerKind::Catch`] scope.
    Filter,
    /// Finally clause; starts with an empty stack
    Finally,
    /// Fault clause; starts with an empty stack
    Fault,
}

impl HandlerKind {
    /// Returns `true` if the handler receives the exception object on the stack.
    #[must_use]
    pub const fn binds_exception(self) -> bool {
        matches!(self, Self::Catch | Self::Filter)
    }
}

/// Kind of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// The method body
    Method,
    /// A protected region
    Try,
    /// A handler region protecting the given try scope
    Handler {
        /// Kind of handler
        kind: HandlerKind,
        /// The protected region this handler belongs to
        protected: ScopeId,
    },
}

/// An exception handling scope.
#[derive(Debug, Clone)]
pub struct Scope {
    pub(crate) kind: ScopeKind,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) entry: Option<BlockId>,
    /// Set once a block was allocated in the scope; a removed entry is not replaced.
    pub(crate) seeded: bool,
}

impl Scope {
    /// Kind of this scope.
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Enclosing scope; `None` only for the method scope.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// First block executed when the scope is entered.
    ///
    /// `None` once that block was removed; blocks added later never become the entry.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// Handler kind, if this is a handler scope.
    #[must_use]
    pub fn handler_kind(&self) -> Option<HandlerKind> {
        match self.kind {
            ScopeKind::Handler { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
