//! Notes agent — demo entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Build the agent (notes file, generation backend, telemetry sink)
//!   5. Seed demo notes, answer demo questions
//!   6. Flush and shut down telemetry

use notes_agent::{NotesAgent, config, error::AppError, logger};
use tracing::{info, warn};

const DEMO_NOTES: &[(&str, &str)] = &[
    ("plans", "Tomorrow: classes until 19:00, volleyball after class at 20:00"),
    ("shopping", "Milk, bread, noodles, cola, onions"),
    ("ideas", "Write an article about local LLMs and their privacy"),
];

const DEMO_QUESTIONS: &[&str] = &[
    "What are my plans for tomorrow?",
    "What do I need to buy?",
    "What ideas did I have?",
];

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level, config.log_file.as_deref())?;

    info!(
        persist_path = ?config.persist_path,
        provider = %config.llm.provider,
        model = ?config.llm.model,
        "config loaded"
    );

    let mut agent = NotesAgent::from_config(&config);
    for (key, text) in DEMO_NOTES {
        agent.add_note(*key, *text);
    }
    info!(
        notes = agent.list_notes().len(),
        notes_path = ?agent.notes_path(),
        model = ?agent.generation().model_id(),
        "agent ready"
    );

    for question in DEMO_QUESTIONS {
        let answer = agent.query_detailed(question, config.max_new_tokens);
        info!(state = ?answer.state(), fallback = answer.used_fallback(), "question answered");
        println!("\nQ: {question}");
        println!("A: {}", answer.text);
    }

    match agent.telemetry().shutdown() {
        Ok(()) => info!("telemetry flushed and shut down"),
        Err(e) => warn!(error = %e, "telemetry flush/shutdown failed"),
    }

    Ok(())
}
