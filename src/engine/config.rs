//! Runtime knobs for the exchange engine. Economic parameters live in
//! `ExchangeParams`, these only shape what the engine keeps around.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_events: 100_000 }
    }
}
