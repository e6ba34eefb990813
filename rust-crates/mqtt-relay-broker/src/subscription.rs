use serde::{Deserialize, Serialize};

/// One filter rule: a measurement plus the tag pairs it requires
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub measurement: String,
    pub tags: Vec<String>,
}

impl Clause {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, pair: impl Into<String>) -> Self {
        self.tags.push(pair.into());
        self
    }
}

/// Outcome of decoding a valid `subscribe:` message
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    /// Replace the whole subscription with these clauses
    Subscribe(Vec<Clause>),
    /// Falsy payload, stop delivery
    Disable,
}

/// Subscription held by one connection
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SubscriptionState {
    /// Never subscribed
    #[default]
    Unsubscribed,
    Subscribed(Vec<Clause>),
    /// Explicitly cleared by the client
    Disabled,
}

impl SubscriptionState {
    /// State after applying a decoded update; never merges with the old clauses
    pub fn apply(self, update: SubscriptionUpdate) -> Self {
        match update {
            SubscriptionUpdate::Subscribe(clauses) => SubscriptionState::Subscribed(clauses),
            SubscriptionUpdate::Disable => SubscriptionState::Disabled,
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        match self {
            SubscriptionState::Subscribed(clauses) => clauses,
            _ => &[],
        }
    }
}
