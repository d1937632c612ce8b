//! `lorebook ask` — Run one retrieval-augmented query from the terminal.

use std::io::Write;
use std::sync::Arc;

use lorebook_chat::{
    ChatOrchestrator, ChatStreamEvent, ContextStore, PromptAssembler, PromptTemplate,
};
use lorebook_config::AppConfig;
use lorebook_core::message::ConversationId;

pub async fn run(
    query: &str,
    conversation: Option<&str>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let orchestrator = build_orchestrator(&config).await?;

    let conversation_id = match conversation {
        Some(id) => ConversationId::from(id),
        None => ConversationId::new(),
    };

    if stream {
        let mut rx = orchestrator.handle_stream(&conversation_id, query).await?;
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ChatStreamEvent::Delta { content } => {
                    print!("{content}");
                    stdout.flush()?;
                }
                ChatStreamEvent::Done { .. } => println!(),
                ChatStreamEvent::Error { message } => {
                    println!("{message}");
                    break;
                }
            }
        }
    } else {
        let reply = orchestrator.handle(&conversation_id, query).await?;
        println!("{reply}");
    }

    Ok(())
}

/// Wire up a one-shot orchestrator from config.
async fn build_orchestrator(
    config: &AppConfig,
) -> Result<Arc<ChatOrchestrator>, Box<dyn std::error::Error>> {
    let provider = lorebook_providers::build_from_config(config)?;
    let retriever = Arc::new(lorebook_retrieval::build_from_config(config, provider.clone()));
    let store = Arc::new(ContextStore::new(
        config.chat.system_prompt.clone(),
        config.chat.max_context_chars,
    ));

    let template = match &config.chat.template_path {
        Some(path) => PromptTemplate::load(path)?,
        None => PromptTemplate::builtin(),
    };

    let mut orchestrator = ChatOrchestrator::new(
        provider,
        retriever,
        store,
        PromptAssembler::new(template),
        &config.provider.model,
        config.provider.temperature,
    )
    .with_max_tokens(config.provider.max_tokens)
    .with_timeouts(
        std::time::Duration::from_secs(config.retrieval.timeout_secs),
        std::time::Duration::from_secs(config.provider.request_timeout_secs),
    )
    .with_reply_without_knowledge(config.chat.reply_without_knowledge);

    if config.transcript.enabled {
        let db_path = config.transcript_db_path();
        let transcript =
            lorebook_chat::SqliteTranscript::new(&db_path.display().to_string()).await?;
        orchestrator = orchestrator.with_transcript(Arc::new(transcript));
    }

    Ok(Arc::new(orchestrator))
}
