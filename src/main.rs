use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use streamchat::chat::{ChatObserver, ChatService, ConversationStore, MemoryStore};
use streamchat::config::{load_config, AppConfig};
use streamchat::engine::SendOutcome;
use streamchat::error::ChatError;
use streamchat::message::{Message, Role, ToolCall};
use streamchat::observability::init_tracing;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {config_path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, config.features.log_format);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        if let Err(e) = run(config).await {
            eprintln!("{e}");
            std::process::exit(1);
        }
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.runtime.worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

/// Prints streamed output to the terminal.
struct TerminalPrinter;

impl TerminalPrinter {
    fn flush() {
        let _ = std::io::stdout().flush();
    }
}

impl ChatObserver for TerminalPrinter {
    fn on_token(&self, _conversation_id: &str, _message: &Message, token: &str) {
        print!("{token}");
        Self::flush();
    }

    fn on_reasoning_content(&self, _conversation_id: &str, _message: &Message, text: &str) {
        eprint!("{text}");
    }

    fn on_tool_call(&self, _conversation_id: &str, _message: &Message, tool_calls: &[ToolCall]) {
        for call in tool_calls {
            eprintln!("[tool] {}({})", call.function.name, call.function.arguments);
        }
    }

    fn on_retry(
        &self,
        _conversation_id: &str,
        _message: &Message,
        error: &ChatError,
        attempt: u32,
    ) {
        eprintln!("\n[retry {attempt}] {error}");
    }

    fn on_complete(&self, _conversation_id: &str, _message: &Message) {
        println!();
    }

    fn on_error(&self, _conversation_id: &str, _message: &Message, error: &ChatError) {
        eprintln!("\n[error] {error}");
    }

    fn on_stop(&self, _conversation_id: &str, _message: &Message) {
        println!("\n[stopped]");
    }
}

async fn run(config: AppConfig) -> Result<(), ChatError> {
    let store = Arc::new(MemoryStore::new());
    let service = ChatService::new(&config, store, Some(Arc::new(TerminalPrinter)))?;
    let conversation_id = uuid::Uuid::new_v4().to_string();

    tracing::info!(
        provider = config.client.provider.as_str(),
        model = %config.generation.model,
        conversation = %conversation_id,
        "chat session ready"
    );
    eprintln!(
        "Type a message and press Enter. /regen regenerates the last answer, \
         /clear starts over, /quit exits. Ctrl-C stops a running answer or exits at the prompt."
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match next_input(&mut lines, ctrl_c()).await {
            Input::Line(line) => line,
            Input::Eof => break,
            Input::Interrupted => {
                println!();
                break;
            }
        };
        let input = line.trim();
        let result = match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                service.clear_history(&conversation_id);
                continue;
            }
            "/regen" => {
                let Some(index) = last_answer_index(&service, &conversation_id) else {
                    eprintln!("Nothing to regenerate.");
                    continue;
                };
                let send = service.regenerate_message(&conversation_id, index);
                interruptible(&service, &conversation_id, send).await
            }
            text => {
                let send = service.send_message(&conversation_id, text, Vec::new());
                interruptible(&service, &conversation_id, send).await
            }
        };
        match result {
            Ok(outcome) => tracing::debug!(outcome = outcome.as_str(), "turn finished"),
            Err(e) => eprintln!("[{}] {e}", e.code().as_str()),
        }
    }

    service.stop_all();
    Ok(())
}

fn prompt() {
    print!("> ");
    TerminalPrinter::flush();
}

fn last_answer_index(service: &ChatService<MemoryStore>, conversation_id: &str) -> Option<usize> {
    service
        .store()
        .messages(conversation_id)
        .iter()
        .rposition(|m| m.role == Role::Assistant)
}

enum Input {
    Line(String),
    Eof,
    Interrupted,
}

/// Wait for the next input line, or for `interrupt` to fire at the idle prompt.
async fn next_input<R, I>(lines: &mut Lines<R>, interrupt: I) -> Input
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => match line {
            Ok(Some(line)) => Input::Line(line),
            Ok(None) => Input::Eof,
            Err(e) => {
                eprintln!("Failed to read input: {e}");
                Input::Eof
            }
        },
        () = interrupt => Input::Interrupted,
    }
}

/// Resolves on Ctrl-C. Never resolves when the signal handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drive a send, stopping the stream on Ctrl-C and then waiting for it to settle.
async fn interruptible<F>(
    service: &ChatService<MemoryStore>,
    conversation_id: &str,
    send: F,
) -> Result<SendOutcome, ChatError>
where
    F: Future<Output = Result<SendOutcome, ChatError>>,
{
    let mut send = std::pin::pin!(send);
    tokio::select! {
        result = &mut send => result,
        () = ctrl_c() => {
            service.stop_stream(conversation_id);
            send.await
        }
    }
}
