pub mod cancel;
pub mod classifier;
pub mod openai;
pub mod orchestrator;
pub mod settings;
pub mod vault;

pub use cancel::{AbortController, CancellationToken};
pub use classifier::{AggregatedOutput, Classifier, ClassifyError, EntryPolicy, ResponseError};
pub use openai::{ChatClient, ChatClientBuilder, ChatClientTrait, ChatError};
pub use orchestrator::{FailurePolicy, Orchestrator, RunError, RunReport, Scope};
pub use settings::{CommandOption, OutputLocation, OutputType, ReferenceSource, Settings};
pub use vault::{DocumentAdapter, DocumentError, FsVault, InputKind, NoteRef};
