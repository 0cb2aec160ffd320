//! Command-line surface and composition root.
//!
//! `serve` builds the full substrate (limiter, cache, vault, HTTP core,
//! dispatcher, task queue, conversation store), wires it together in one
//! explicit container and hands the dispatcher to the chosen transport.
//! There are no implicit global singletons; everything lives here.

use crate::cache::{CacheCategory, CacheManager, CategoryLimits};
use crate::client::PlatformClient;
use crate::config::{
    load_config, Config, ConversationBackend, NameStyleSetting, QueueBackendKind, TransportKind,
};
use crate::convo::{ConversationStore, FileConversationStore, SqliteConversationStore};
use crate::errors::LatticeError;
use crate::limiter::{BucketConfig, TieredRateLimiter};
use crate::queue::{
    MemoryBackend, QueueBackend, QueueConfig, QueuedTask, RedisBackend, TaskExecutor, TaskQueue,
};
use crate::registry::{catalog, Dispatcher, Envelope, NameStyle, ToolPolicy};
use crate::transport;
use crate::utils::get_lattice_home;
use crate::vault::crypto::SealedBox;
use crate::vault::{TokenKind, TokenVault};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "MCP gateway for collaboration-suite platforms")]
#[command(version = crate::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the config file (default: ~/.lattice/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server
    Serve {
        /// Transport: stdio or sse
        #[arg(long)]
        transport: Option<String>,
        /// Tool preset to expose
        #[arg(long)]
        preset: Option<String>,
        /// Bind address for the SSE transport
        #[arg(long)]
        bind: Option<String>,
        /// Tool name style: dotted, camel, snake or underscore
        #[arg(long)]
        case: Option<String>,
    },
    /// List the tools a preset exposes
    Tools {
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        case: Option<String>,
    },
}

/// Everything the transports and workers share, built once at startup.
pub struct Substrate {
    pub limiter: Arc<TieredRateLimiter>,
    pub cache: Arc<CacheManager>,
    pub vault: Arc<TokenVault>,
    pub client: Arc<PlatformClient>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<TaskQueue>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl std::fmt::Debug for Substrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substrate").finish_non_exhaustive()
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            transport,
            preset,
            bind,
            case,
        } => {
            let mut config = config;
            apply_overrides(&mut config, transport, preset, bind, case)?;
            serve(config).await
        }
        Commands::Tools { preset, case } => {
            list_tools(&config, preset, case);
            Ok(())
        }
    }
}

fn apply_overrides(
    config: &mut Config,
    transport: Option<String>,
    preset: Option<String>,
    bind: Option<String>,
    case: Option<String>,
) -> Result<()> {
    if let Some(transport) = transport {
        config.server.transport = match transport.as_str() {
            "stdio" => TransportKind::Stdio,
            "sse" => TransportKind::Sse,
            other => anyhow::bail!("unknown transport '{}' (expected stdio or sse)", other),
        };
    }
    if let Some(preset) = preset {
        config.server.preset = preset;
    }
    if let Some(bind) = bind {
        let (host, port) = bind
            .rsplit_once(':')
            .context("bind address must be host:port")?;
        config.server.host = host.to_string();
        config.server.port = port.parse().context("bind port must be numeric")?;
    }
    if let Some(case) = case {
        config.server.name_style = parse_case(&case)?;
    }
    Ok(())
}

fn parse_case(case: &str) -> Result<NameStyleSetting> {
    Ok(match case {
        "dotted" => NameStyleSetting::Dotted,
        "camel" => NameStyleSetting::Camel,
        "snake" => NameStyleSetting::Snake,
        "underscore" => NameStyleSetting::Underscore,
        other => anyhow::bail!("unknown name style '{}'", other),
    })
}

fn list_tools(config: &Config, preset: Option<String>, case: Option<String>) {
    let style: NameStyle = case
        .as_deref()
        .and_then(|c| parse_case(c).ok())
        .unwrap_or(config.server.name_style)
        .into();
    let registry = catalog::builtin_registry();
    let presets = catalog::builtin_presets();
    let policy = ToolPolicy {
        preset: Some(preset.unwrap_or_else(|| config.server.preset.clone())),
        allow: config.server.allow.clone(),
        deny: config.server.deny.clone(),
        token_mode: config.server.token_mode.into(),
    };
    for descriptor in crate::registry::preset::resolve(&registry, &presets, &policy) {
        match crate::registry::casing::render(&descriptor.name, style) {
            Ok(name) => println!("{:<40} {}", name, descriptor.description),
            Err(e) => warn!("skipping {}: {}", descriptor.name, e),
        }
    }
}

/// Build the full substrate from config.
pub async fn build_substrate(config: &Config) -> Result<Substrate> {
    // Rate limiter: built-in tiers with config overrides merged over them.
    let mut tiers = TieredRateLimiter::default_tiers();
    for (name, settings) in &config.limiter.tiers {
        tiers.insert(
            name.clone(),
            BucketConfig::new(
                settings.capacity,
                settings.refill_tokens,
                Duration::from_millis(settings.refill_interval_ms),
                Duration::from_millis(settings.max_wait_ms),
            ),
        );
    }
    let limiter = Arc::new(TieredRateLimiter::new(tiers));

    // Cache: category overrides from config.
    let mut category_limits = HashMap::new();
    for (name, settings) in &config.cache.categories {
        let Some(category) = CacheCategory::parse(name) else {
            warn!("unknown cache category '{}' in config, ignored", name);
            continue;
        };
        category_limits.insert(
            category,
            CategoryLimits::new(
                Duration::from_millis(settings.ttl_ms),
                settings.max_entries,
                settings.max_bytes,
            ),
        );
    }
    let cache = Arc::new(CacheManager::new(category_limits));

    // Vault: explicit key, falling back to the app secret.
    let vault_secret = if config.vault.encryption_key.is_empty() {
        config.platform.app_secret.clone()
    } else {
        config.vault.encryption_key.clone()
    };
    if vault_secret.is_empty() {
        return Err(LatticeError::Misconfigured(
            "no vault key: set APP_SECRET or vault.encryptionKey".to_string(),
        )
        .into());
    }
    let vault = Arc::new(TokenVault::new(
        &vault_secret,
        config.vault.audit_limit,
        Some(cache.clone()),
    )?);

    if let Ok(user_token) = std::env::var("USER_ACCESS_TOKEN") {
        if !user_token.is_empty() {
            vault.store(TokenKind::User, &user_token, None)?;
            info!("user access token loaded from environment");
        }
    }

    let client = Arc::new(PlatformClient::new(
        &config.platform.base_url,
        config.platform.timeout_secs,
        config.platform.max_retries,
        limiter.clone(),
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        catalog::builtin_registry(),
        catalog::builtin_presets(),
        ToolPolicy {
            preset: Some(config.server.preset.clone()),
            allow: config.server.allow.clone(),
            deny: config.server.deny.clone(),
            token_mode: config.server.token_mode.into(),
        },
        config.server.name_style.into(),
        client.clone(),
        vault.clone(),
    )?);

    let backend: Arc<dyn QueueBackend> = match config.queue.backend {
        QueueBackendKind::Memory => Arc::new(MemoryBackend::new()),
        QueueBackendKind::Redis => {
            let url = config
                .queue
                .redis_url
                .as_deref()
                .context("queue.redisUrl required for the redis backend")?;
            Arc::new(RedisBackend::connect(url, &config.queue.redis_prefix).await?)
        }
    };
    let queue = Arc::new(TaskQueue::new(
        backend,
        QueueConfig {
            max_concurrency: config.queue.max_concurrency,
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
            max_retries: config.queue.max_retries,
            base_delay: Duration::from_millis(config.queue.base_delay_ms),
        },
    ));

    let convo_dir = match &config.conversations.path {
        Some(path) => path.clone(),
        None => get_lattice_home()?.join("conversations"),
    };
    let convo_cipher = if config.conversations.encrypt {
        // Encryption was asked for; a missing key is fatal, not a downgrade.
        Some(SealedBox::from_secret(&vault_secret)?)
    } else {
        None
    };
    let conversations: Arc<dyn ConversationStore> = match config.conversations.backend {
        ConversationBackend::File => Arc::new(FileConversationStore::new(
            &convo_dir,
            convo_cipher,
            config.conversations.retention_days,
        )?),
        ConversationBackend::Sqlite => Arc::new(SqliteConversationStore::new(
            convo_dir.join("conversations.db"),
            convo_cipher,
            config.conversations.retention_days,
        )?),
    };

    Ok(Substrate {
        limiter,
        cache,
        vault,
        client,
        dispatcher,
        queue,
        conversations,
    })
}

/// Queue executor that routes task payloads `{tool, params}` back through
/// the dispatcher.
struct DispatcherExecutor {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait::async_trait]
impl TaskExecutor for DispatcherExecutor {
    async fn execute(&self, task: &QueuedTask) -> Result<Value> {
        let tool = task
            .payload
            .get("tool")
            .and_then(Value::as_str)
            .context("task payload missing 'tool'")?;
        let params = task.payload.get("params").cloned().unwrap_or(Value::Null);
        let envelope = self.dispatcher.invoke(tool, params).await?;
        if envelope.is_error {
            let Envelope { content, .. } = &envelope;
            let detail = match content.first() {
                Some(crate::registry::ContentBlock::Text { text }) => text.clone(),
                None => String::new(),
            };
            anyhow::bail!("tool reported error: {}", detail);
        }
        Ok(serde_json::to_value(&envelope)?)
    }
}

async fn serve(config: Config) -> Result<()> {
    if config.platform.app_id.is_empty() || config.platform.app_secret.is_empty() {
        anyhow::bail!("APP_ID and APP_SECRET are required to serve");
    }

    let substrate = build_substrate(&config).await?;

    // Bootstrap the tenant credential so tenant-gated tools work out of the
    // box. Failure is non-fatal: user-token flows may still proceed.
    match substrate
        .client
        .fetch_tenant_token(&config.platform.app_id, &config.platform.app_secret)
        .await
    {
        Ok((token, expire_secs)) => {
            let expires_at = Utc::now() + ChronoDuration::seconds(expire_secs.max(60) - 60);
            substrate
                .vault
                .store(TokenKind::Tenant, &token, Some(expires_at))?;
            info!("tenant access token ready (expires in {}s)", expire_secs);
        }
        Err(e) => warn!("tenant token bootstrap failed: {}", e),
    }

    // Background work: queue workers feed back into the dispatcher.
    let scheduler = substrate.queue.clone().start(Arc::new(DispatcherExecutor {
        dispatcher: substrate.dispatcher.clone(),
    }));

    // Periodic conversation retention sweep.
    let retention_store = substrate.conversations.clone();
    let retention = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            match retention_store.cleanup().await {
                Ok(0) => {}
                Ok(n) => info!("conversation retention removed {} record(s)", n),
                Err(e) => warn!("conversation retention sweep failed: {}", e),
            }
        }
    });

    let served = match config.server.transport {
        TransportKind::Stdio => transport::stdio::serve(substrate.dispatcher.clone()).await,
        TransportKind::Sse => {
            let addr = format!("{}:{}", config.server.host, config.server.port);
            transport::sse::serve(&addr, substrate.dispatcher.clone()).await
        }
    };

    substrate.queue.stop();
    retention.abort();
    let _ = scheduler.await;
    served
}
