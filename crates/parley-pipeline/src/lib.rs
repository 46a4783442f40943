pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod slash;
pub mod thinking;

pub use error::{PipelineError, Result};
pub use pipeline::{ChatPipeline, TurnContext, TurnUpdate, MAX_MESSAGE_LENGTH, STREAM_UPDATE_INTERVAL};
pub use slash::{dispatch_slash, SlashOutcome};
