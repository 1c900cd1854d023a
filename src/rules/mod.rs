//! Project rules stored as `.mdc` files under `.cursor/rules/`.

mod manager;
mod parser;

pub use manager::RuleManager;
pub use parser::ProjectRule;
#[cfg(test)]
pub use parser::parse_rule_str;
