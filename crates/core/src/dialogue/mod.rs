mod engine;
pub mod prompts;
mod steps;

pub use engine::{
    transition, DialogueEngine, NextSession, Transition, TransitionContext, TurnAction,
};
pub use steps::{
    is_finish, is_trigger, DialogueStep, InboundEvent, InboundKind, InputClass, CANCEL_PHRASE,
    FINISH_PHRASE, HELP_PHRASE, IDENTITY_PHRASE, RESTART_PHRASE, TODAY_PHRASE, TOMORROW_PHRASE,
    TRIGGER_KEYWORD,
};
