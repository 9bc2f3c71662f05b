//! The orchestration core of Reflexa.
//!
//! A turn is a sequence of **decide → execute** iterations:
//!
//! 1. **Decide**: the `reasoning` model reads the registered actions and
//!    what happened so far, streams its reasoning and names one action
//! 2. **Execute**: the action runs (reply, memory lookup, clarifying
//!    question or finalize), streaming its output through the relay
//! 3. **Repeat** until an action finalizes the turn or the iteration limit
//!    forces it to end
//!
//! Model answers follow the body/JSON protocol in [`protocol`]: text for the
//! user first, then a sentinel line, then one line of JSON for the runtime.

pub mod actions;
pub mod context;
pub mod loop_runner;
pub mod prompts;
pub mod protocol;
pub mod recorder;
pub mod relay;
pub mod stream_event;
pub mod title;

pub use actions::{
    Action, ActionOutcome, ActionRegistry, FinalizeAction, MemorySearchAction, QuestionAction,
    ReplyAction,
};
pub use context::{
    ActionContextEntry, ChatContext, EntryFilter, EntryKind, IterationLlmRequest,
    MemorySearchGroup,
};
pub use loop_runner::{AgentLoop, Decision, Resolution, TurnOutcome, TurnReport, resolve_action};
pub use protocol::{BodyJsonParser, END_OF_BODY};
pub use recorder::MemoryRecorder;
pub use relay::{EventSink, MessageRelay, RecordingSink};
pub use stream_event::SessionEvent;
