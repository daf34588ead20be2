//! Source synthesis: turns a task into program text through a streaming model.

use std::{path::Path, pin::Pin, sync::Arc, time::Duration};

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::{
    error::{PipelineError, Result},
    llm::{ChatMessage, ChatOptions, LlmClient, Role, StreamEvent},
};

pub mod fence;
pub mod prompt;

pub use fence::strip_fences;

pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A generative model that answers a conversation with text fragments.
pub trait CodeModel: Send + Sync {
    fn generate(&self, messages: Vec<ChatMessage>) -> FragmentStream;
}

/// [`LlmClient`] bound to fixed chat options.
#[derive(Debug, Clone)]
pub struct ChatModel {
    client: LlmClient,
    opts: ChatOptions,
}

impl ChatModel {
    pub fn new(client: LlmClient, opts: ChatOptions) -> Self {
        Self { client, opts }
    }
}

impl CodeModel for ChatModel {
    fn generate(&self, messages: Vec<ChatMessage>) -> FragmentStream {
        let events = self.client.chat_stream(messages, self.opts.clone());
        Box::pin(events.filter_map(|ev| async move {
            match ev {
                Ok(StreamEvent::Content(t)) => Some(Ok(t)),
                Ok(StreamEvent::Done) => None,
                Err(e) => Some(Err(e)),
            }
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthEvent {
    /// One fragment as received, plus everything received so far.
    Fragment { text: String, so_far: String },
    /// Generation completed with a non-blank buffer.
    Finished { source: String },
}

pub type SynthStream = Pin<Box<dyn Stream<Item = Result<SynthEvent>> + Send>>;

#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn CodeModel>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn CodeModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Generation as a stream of events. Dropping the stream cancels the call.
    pub fn fragments(&self, task: &str, output_dir: &Path) -> SynthStream {
        let messages = vec![
            ChatMessage::new(Role::System, prompt::SYSTEM_ROLE),
            ChatMessage::new(Role::User, prompt::instruction(task, output_dir)),
        ];
        let mut inner = self.model.generate(messages);

        Box::pin(try_stream! {
            let mut so_far = String::new();
            while let Some(fragment) = inner.next().await {
                let text = fragment
                    .map_err(|e| PipelineError::SynthesisFailed(format!("{e:#}")))?;
                so_far.push_str(&text);
                yield SynthEvent::Fragment { text, so_far: so_far.clone() };
            }
            if so_far.trim().is_empty() {
                Err::<(), _>(PipelineError::SynthesisEmpty)?;
            }
            yield SynthEvent::Finished { source: so_far };
        })
    }

    /// Run one generation to completion, reporting the buffer after every fragment.
    pub async fn synthesize(
        &self,
        task: &str,
        output_dir: &Path,
        mut on_progress: impl FnMut(&str),
    ) -> Result<String> {
        let mut events = self.fragments(task, output_dir);
        let run = async {
            let mut source = String::new();
            while let Some(ev) = events.next().await {
                match ev? {
                    SynthEvent::Fragment { so_far, .. } => on_progress(&so_far),
                    SynthEvent::Finished { source: done } => source = done,
                }
            }
            Ok(source)
        };
        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::SynthesisFailed(format!(
                "no complete response within {:?}",
                self.timeout
            ))),
        }
    }
}
