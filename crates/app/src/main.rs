use anyhow::Context;
use askpdf_core::stores::LocalVectorStore;
use askpdf_core::{
    ingest_folder, CharacterNgramEmbedder, ChatMessage, ChatSession, Embedder, GenerationOptions,
    HuggingFaceEmbedder, HuggingFaceEndpoint, IngestionOptions, QueryOptions, RetrievalQa, Role,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_DATA_PATH, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EMBEDDING_MODEL_DIMENSIONS, DEFAULT_INDEX_PATH, DEFAULT_INFERENCE_URL,
    DEFAULT_LLM_REPO_ID, DEFAULT_MAX_NEW_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "askpdf", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector index
    #[arg(long, default_value = DEFAULT_INDEX_PATH)]
    index_path: PathBuf,

    /// Embedding backend; must match between ingest and queries
    #[arg(long, value_enum, default_value_t = EmbedderKind::Huggingface)]
    embedder: EmbedderKind,

    /// Hugging Face sentence-embedding model
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Output dimension of the Hugging Face embedding model
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_MODEL_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Base URL of the Hugging Face inference API
    #[arg(long, default_value = DEFAULT_INFERENCE_URL)]
    inference_url: String,

    /// Hugging Face access token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Abort HTTP requests after this many seconds (no limit by default)
    #[arg(long)]
    request_timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// sentence-transformers model served by the Hugging Face inference API
    Huggingface,
    /// Offline hashed character trigrams
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Split and embed every PDF in a folder and write the vector index.
    Ingest {
        /// Folder that contains the PDFs.
        #[arg(long, default_value = DEFAULT_DATA_PATH)]
        data_dir: PathBuf,
        /// Maximum chunk length in characters.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Characters shared by neighbouring chunks.
        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        chunk_overlap: usize,
        /// Also read PDFs in subfolders.
        #[arg(long, default_value_t = false)]
        recursive: bool,
    },
    /// Answer one question read from stdin (or --query) and print its sources.
    Ask {
        /// Question to answer instead of prompting on stdin.
        #[arg(long)]
        query: Option<String>,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Interactive chat over the indexed documents.
    Chat {
        #[command(flatten)]
        generation: GenerationArgs,
    },
}

#[derive(Args)]
struct GenerationArgs {
    /// Hosted text-generation model.
    #[arg(long, default_value = DEFAULT_LLM_REPO_ID)]
    repo_id: String,
    /// Number of chunks retrieved as context.
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
    /// Sampling temperature.
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,
    /// Maximum number of generated tokens.
    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: u32,
}

type Qa = RetrievalQa<Box<dyn Embedder>, LocalVectorStore, HuggingFaceEndpoint>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "askpdf boot"
    );

    if cli.hf_token.is_none() && needs_hf_token(&cli) {
        warn!("HF_TOKEN is not set; Hugging Face inference requests will likely be rejected");
    }

    let client = build_http_client(cli.request_timeout_secs)?;
    let embedder = build_embedder(&cli, &client);

    match cli.command {
        Command::Ingest {
            ref data_dir,
            chunk_size,
            chunk_overlap,
            recursive,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
                recursive,
            };
            let report = ingest_folder(data_dir, &cli.index_path, &embedder, &options)
                .await
                .with_context(|| format!("failed to ingest {}", data_dir.display()))?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }

            println!(
                "{} chunks from {} page(s) in {} file(s) written to {} at {}",
                report.chunks.len(),
                report.page_count,
                report.files_found - report.skipped_files.len(),
                cli.index_path.display(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            ref query,
            ref generation,
        } => {
            let qa = load_qa(&cli, embedder, generation, &client).await?;
            let question = match query {
                Some(query) => query.clone(),
                None => read_question().await?,
            };

            let answer = match qa.answer(&question).await {
                Ok(answer) => answer,
                Err(error) => {
                    eprintln!("Error: {error}");
                    anyhow::bail!("question could not be answered");
                }
            };

            println!("RESULT: {}", answer.text);
            println!("SOURCE DOCUMENTS:");
            for (rank, source) in answer.sources.iter().enumerate() {
                println!("  [{}] score={:.4} {}", rank + 1, source.score, source.chunk);
            }
        }
        Command::Chat { ref generation } => {
            let qa = load_qa(&cli, embedder, generation, &client).await?;
            run_chat(ChatSession::new(qa)).await?;
        }
    }

    Ok(())
}

fn build_http_client(timeout_secs: Option<u64>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().context("failed to build http client")
}

/// Ingest with the offline embedder is the only run that never calls the
/// inference API.
fn needs_hf_token(cli: &Cli) -> bool {
    matches!(cli.embedder, EmbedderKind::Huggingface)
        || !matches!(cli.command, Command::Ingest { .. })
}

fn build_embedder(cli: &Cli, client: &reqwest::Client) -> Box<dyn Embedder> {
    match cli.embedder {
        EmbedderKind::Huggingface => Box::new(
            HuggingFaceEmbedder::new(
                &cli.inference_url,
                &cli.embedding_model,
                cli.embedding_dimensions,
                cli.hf_token.clone(),
            )
            .with_client(client.clone()),
        ),
        EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
    }
}

async fn load_qa(
    cli: &Cli,
    embedder: Box<dyn Embedder>,
    generation: &GenerationArgs,
    client: &reqwest::Client,
) -> anyhow::Result<Qa> {
    let generator = HuggingFaceEndpoint::new(
        &cli.inference_url,
        &generation.repo_id,
        cli.hf_token.clone(),
        GenerationOptions {
            temperature: generation.temperature,
            max_new_tokens: generation.max_new_tokens,
        },
    )
    .with_client(client.clone());

    let qa = match RetrievalQa::from_index_path(&cli.index_path, embedder, generator).await {
        Ok(qa) => qa,
        Err(error) => {
            eprintln!("Failed to load vector store: {error}");
            anyhow::bail!("vector index unavailable at {}", cli.index_path.display());
        }
    };

    Ok(qa.with_options(QueryOptions {
        top_k: generation.top_k,
    }))
}

async fn read_question() -> anyhow::Result<String> {
    print!("Write Query Here: ");
    std::io::stdout().flush()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    Ok(lines.next_line().await?.unwrap_or_default())
}

async fn run_chat(
    mut session: ChatSession<Box<dyn Embedder>, LocalVectorStore, HuggingFaceEndpoint>,
) -> anyhow::Result<()> {
    println!("Ask Chatbot! (end the session with Ctrl-D)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(question) = lines.next_line().await? else {
            break;
        };
        if question.trim().is_empty() {
            continue;
        }

        match session.ask(&question).await {
            Ok(reply) => {
                debug!(cached = reply.cached, sources = reply.sources.len(), "answered");
                for message in current_turn(session.transcript()) {
                    println!("{}", render(message));
                }
            }
            Err(error) => eprintln!("Error: {error}"),
        }
    }

    info!(messages = session.transcript().len(), "chat session ended");
    Ok(())
}

/// Messages from the latest user turn onwards.
fn current_turn(transcript: &[ChatMessage]) -> &[ChatMessage] {
    let start = transcript
        .iter()
        .rposition(|message| message.role == Role::User)
        .unwrap_or(0);
    &transcript[start..]
}

fn render(message: &ChatMessage) -> String {
    let mut lines = message.content.lines();
    let mut rendered = format!("{}: {}", message.role, lines.next().unwrap_or_default());
    let indent = " ".repeat(message.role.to_string().len() + 2);
    for line in lines {
        rendered.push('\n');
        rendered.push_str(&indent);
        rendered.push_str(line);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn turn_shows_question_and_answer() {
        let transcript = vec![
            message(Role::User, "first?"),
            message(Role::Assistant, "one"),
            message(Role::User, "second?"),
            message(Role::Assistant, "two"),
        ];

        let rendered: Vec<String> = current_turn(&transcript).iter().map(render).collect();
        assert_eq!(rendered, vec!["user: second?", "assistant: two"]);
    }

    #[test]
    fn failed_turn_shows_only_the_question() {
        let transcript = vec![message(Role::User, "why?")];
        assert_eq!(current_turn(&transcript).len(), 1);
        assert_eq!(render(&transcript[0]), "user: why?");
    }

    #[test]
    fn continuation_lines_are_indented() {
        let rendered = render(&message(Role::Assistant, "Steps:\n1. Open\n2. Close"));
        assert_eq!(
            rendered,
            "assistant: Steps:\n           1. Open\n           2. Close"
        );
    }

    #[test]
    fn offline_ingest_needs_no_token() {
        let offline = Cli::parse_from(["askpdf", "--embedder", "ngram", "ingest"]);
        let hosted = Cli::parse_from(["askpdf", "ingest"]);
        let chat = Cli::parse_from(["askpdf", "--embedder", "ngram", "chat"]);

        assert!(!needs_hf_token(&offline));
        assert!(needs_hf_token(&hosted));
        assert!(needs_hf_token(&chat));
    }

    #[tokio::test]
    async fn missing_index_fails_before_any_question() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let index_path = dir.path().join("absent").display().to_string();
        let cli = Cli::parse_from([
            "askpdf",
            "--embedder",
            "ngram",
            "--index-path",
            index_path.as_str(),
            "ask",
            "--query",
            "What is the capital of Example-land?",
        ]);
        let Command::Ask { ref generation, .. } = cli.command else {
            anyhow::bail!("expected the ask command");
        };

        let client = build_http_client(None)?;
        let result = load_qa(&cli, build_embedder(&cli, &client), generation, &client).await;
        assert!(result.is_err());
        Ok(())
    }
}
