//! Options carried by CRUD operations.

/// Who a mutation is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveBy {
    /// No actor recorded
    #[default]
    None,
    /// An explicit actor `$ID`
    Actor(String),
    /// The affected document's own `$ID` (the `saveBy: true` form)
    Own,
}

impl SaveBy {
    /// Resolve against the id of the affected document.
    pub fn resolve(&self, own_id: &str) -> Option<String> {
        match self {
            SaveBy::None => None,
            SaveBy::Actor(actor) => Some(actor.clone()),
            SaveBy::Own => Some(own_id.to_string()),
        }
    }
}

/// Options accepted by `add`, `set`, and `save`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpOptions {
    /// Actor attribution
    pub save_by: SaveBy,
    /// Free-form tag forwarded into the change event
    pub tag: Option<String>,
    /// Explicit transaction to record into; defaults to the active one
    pub txn_id: Option<String>,
}

impl OpOptions {
    /// No actor, no tag, no explicit transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute the mutation to an explicit actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.save_by = SaveBy::Actor(actor.into());
        self
    }

    /// Attribute the mutation to the affected document itself.
    pub fn with_own_actor(mut self) -> Self {
        self.save_by = SaveBy::Own;
        self
    }

    /// Forward a tag into the change event.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Record into a specific transaction.
    pub fn with_txn(mut self, txn_id: impl Into<String>) -> Self {
        self.txn_id = Some(txn_id.into());
        self
    }
}
