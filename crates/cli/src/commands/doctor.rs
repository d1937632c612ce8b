//! `lorebook doctor` — Diagnose configuration and collaborator health.

use lorebook_chat::PromptTemplate;
use lorebook_config::AppConfig;
use lorebook_core::CompletionProvider;
use lorebook_core::retrieval::VectorIndex;
use lorebook_retrieval::HttpVectorIndex;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("📚 Lorebook Doctor");
    println!();

    // Config
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✓ Config loaded");
            config
        }
        Err(e) => {
            println!("  ✗ Config failed to load: {e}");
            return Ok(());
        }
    };

    // API key
    if config.has_api_key() {
        println!("  ✓ API key present");
    } else {
        println!("  ✗ No API key — set LOREBOOK_API_KEY or api_key in config");
    }

    // Prompt template
    match &config.chat.template_path {
        Some(path) => match PromptTemplate::load(path) {
            Ok(_) => println!("  ✓ Prompt template at {}", path.display()),
            Err(e) => println!("  ✗ Prompt template: {e}"),
        },
        None => println!("  ✓ Prompt template (built-in)"),
    }

    // Completion endpoint
    match lorebook_providers::build_from_config(&config) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!("  ✓ Completion endpoint reachable ({})", config.provider.base_url),
            Ok(false) => println!("  ✗ Completion endpoint unhealthy ({})", config.provider.base_url),
            Err(e) => println!("  ✗ Completion endpoint: {e}"),
        },
        Err(e) => println!("  ✗ Provider: {e}"),
    }

    // Vector backend
    let index = HttpVectorIndex::new(&config.retrieval.index_url, config.retrieval.index_token.clone());
    match index.health_check().await {
        Ok(true) => println!("  ✓ Vector backend reachable ({})", config.retrieval.index_url),
        Ok(false) => println!("  ✗ Vector backend unhealthy ({})", config.retrieval.index_url),
        Err(e) => println!("  ✗ Vector backend: {e}"),
    }

    println!();
    println!("  Model:      {}", config.provider.model);
    println!("  Embeddings: {} (dim {})", config.retrieval.embedding_model, config.retrieval.embedding_dimension);
    println!("  Collection: {} (top_k {})", config.retrieval.collection, config.retrieval.top_k);
    println!("  Context:    {} chars", config.chat.max_context_chars);

    Ok(())
}
