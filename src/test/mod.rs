//! Moderated hypothesis tests.

pub mod moderated;

pub use moderated::{ebayes, EBayesConfig, EBayesFit, ModeratedStat, ModeratedTest};
