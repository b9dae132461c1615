// =============================================================================
// Paper Trading — rule-based simulation over the live funding stream
// =============================================================================

pub mod engine;
pub mod strategy;

pub use engine::PaperTradingEngine;
