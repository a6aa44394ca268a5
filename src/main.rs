use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use mcp_autonomy::agent_core::tool_executor::{McpTool, ToolInvoker};
use mcp_autonomy::inference::model_validator::{ModelListing, ModelValidator};
use mcp_autonomy::inference::tool_schema::{render_tools, to_backend_format};
use mcp_autonomy::inference::{CompletionBackend, InferenceClient, ToolFormat};
use mcp_autonomy::mcp_client::McpSession;
use mcp_autonomy::{AppConfig, McpDiscovery, Orchestrator, ProtocolVariant, ToolChoice};

#[derive(Parser)]
#[command(name = "mcp-autonomy", version)]
#[command(about = "Let a local model drive MCP tools until the task is done")]
struct Cli {
    /// Log to stderr instead of the data-directory log file
    #[arg(long, global = true)]
    log_stderr: bool,

    /// Emit logs as JSON lines (with --log-stderr)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task autonomously against one or more MCP servers
    Run {
        /// What the model should accomplish
        #[arg(value_name = "TASK")]
        task: String,

        /// MCP server from the discovery file (repeatable)
        #[arg(short, long = "server", value_name = "NAME")]
        servers: Vec<String>,

        /// Model id; omitted or "default" uses the configured or auto-selected model
        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        max_rounds: Option<u32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Use the stateful /responses protocol
        #[arg(long)]
        stateful: bool,

        /// auto, required, or a tool name
        #[arg(long, default_value = "auto")]
        tool_choice: ToolChoice,

        /// System prompt prepended to the task
        #[arg(long)]
        system: Option<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List servers in the discovery file
    Servers {
        /// Include disabled servers
        #[arg(long)]
        all: bool,
    },

    /// Start a server and print its tools in backend form
    Tools {
        server: String,

        /// Print the flattened /responses shape
        #[arg(long)]
        stateful: bool,
    },

    /// List models served by the backend
    Models {
        /// Check that this model is available
        #[arg(long, value_name = "MODEL")]
        validate: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.log_stderr {
        mcp_autonomy::init_stderr_tracing(cli.log_json);
    } else if let Err(e) = mcp_autonomy::init_tracing() {
        eprintln!("warning: file logging unavailable ({e}), logging to stderr");
        mcp_autonomy::init_stderr_tracing(cli.log_json);
    }

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load().context("failed to load settings")?;

    match command {
        Command::Run {
            task,
            servers,
            model,
            max_rounds,
            max_tokens,
            stateful,
            tool_choice,
            system,
            json,
        } => {
            let orchestrator = Orchestrator::from_config(&config)?;
            let mut request = orchestrator
                .request(task, servers)
                .with_model(model)
                .with_tool_choice(tool_choice);
            if let Some(n) = max_rounds {
                request = request.with_max_rounds(n);
            }
            if let Some(n) = max_tokens {
                request = request.with_max_tokens(n);
            }
            if stateful {
                request = request.with_protocol(ProtocolVariant::Stateful);
            }
            if let Some(prompt) = system {
                request = request.with_system_prompt(prompt);
            }

            let outcome = orchestrator.run(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.summary());
            }
            Ok(if outcome.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }

        Command::Servers { all } => {
            let discovery = McpDiscovery::from_env();
            let path = discovery.resolve_path()?;
            eprintln!("discovery file: {}", path.display());
            for (name, enabled) in discovery.list_all_servers()? {
                if enabled {
                    println!("{name}");
                } else if all {
                    println!("{name} (disabled)");
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Tools { server, stateful } => {
            let descriptor = McpDiscovery::from_env().get_connection_params(&server)?;
            let timeout = Duration::from_millis(config.orchestrator.tool_call_timeout_ms);
            let session = Arc::new(McpSession::spawn(&descriptor, timeout).await?);

            let listed = McpTool::list(&session).await;
            session.shutdown().await;

            let tools: Vec<_> = listed?
                .iter()
                .map(|t| to_backend_format(t.definition()))
                .collect();
            let format = if stateful {
                ToolFormat::Responses
            } else {
                ToolFormat::Chat
            };
            println!("{}", serde_json::to_string_pretty(&render_tools(&tools, format))?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Models { validate } => {
            let backend: Arc<dyn CompletionBackend> =
                Arc::new(InferenceClient::from_config(&config.backend)?);
            let validator = ModelValidator::new(
                backend,
                Duration::from_secs(config.model_cache_ttl_secs),
            );

            match validator.listing().await {
                ModelListing::Live(models) => {
                    for m in &models {
                        let tag = if m.is_embedding() { " (embedding)" } else { "" };
                        println!("{}{tag}", m.id);
                    }
                }
                ModelListing::Degraded(reason) => {
                    bail!("backend at {} unreachable: {reason}", config.backend.base_url)
                }
            }

            if let Some(name) = validate {
                validator.validate(Some(&name)).await?;
                eprintln!("model '{name}' is available");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
