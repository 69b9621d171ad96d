//! riva server assembly.
//!
//! Builds the adapters, responder, and admission state from config, mounts the
//! webhook routes, and serves until ctrl-c or SIGTERM.

use crate::admission::AdmissionController;
use crate::config::RivaConfig;
use crate::pipeline::ReplyPipeline;
use crate::webhook::{self, WebhookState};
use anyhow::Result;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use riva_channels::{
    Channel, ChannelAdapter, GraphDirectAdapter, OutboundMessage, WhatsAppCloudAdapter,
};
use riva_llm::{CompletionClient, Responder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = RivaConfig::load_with_path(config_path).await?;
    tracing::info!(
        model = %cfg.general.model,
        bind_addr = %cfg.runtime.bind_addr,
        messenger_enabled = cfg.channels.messenger.enabled,
        instagram_enabled = cfg.channels.instagram.enabled,
        whatsapp_enabled = cfg.channels.whatsapp.enabled,
        signature_enforced = cfg.webhook.app_secret.is_some() && !cfg.webhook.allow_unsigned,
        config_path = %path.display(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    channel: &str,
    recipient: &str,
    message: &str,
) -> Result<()> {
    let cfg = RivaConfig::load(config_path).await?;
    let channel: Channel = channel.parse()?;
    let channels = build_channel_adapters(&cfg)?;
    let adapter = channels
        .get(&channel)
        .ok_or_else(|| anyhow::anyhow!("channel {channel} is not enabled in config"))?;
    adapter
        .send(recipient, OutboundMessage::new(message))
        .await
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = RivaConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    tracing::info!(
        bind_addr = %addr,
        model = %cfg.general.model,
        messenger_enabled = cfg.channels.messenger.enabled,
        instagram_enabled = cfg.channels.instagram.enabled,
        whatsapp_enabled = cfg.channels.whatsapp.enabled,
        signature_enforced = cfg.webhook.app_secret.is_some() && !cfg.webhook.allow_unsigned,
        debug_routes = cfg.webhook.debug_routes,
        sender_cooldown_seconds = cfg.limits.sender_cooldown_seconds,
        reply_cache_ttl_seconds = cfg.limits.reply_cache_ttl_seconds,
        completion_attempts = cfg.limits.completion_attempts,
        completion_timeout_seconds = cfg.limits.completion_timeout_seconds,
        http_timeout_seconds = cfg.runtime.http_timeout_seconds,
        http_max_in_flight = cfg.runtime.http_max_in_flight,
        config_path = %cfg_path.display(),
        "server configuration loaded"
    );
    if cfg.webhook.allow_unsigned {
        tracing::warn!(
            "webhook signature verification is DISABLED (webhook.allow_unsigned); local debugging only"
        );
    }
    let listener = preflight_bind_listener(addr).await?;

    let channels = build_channel_adapters(&cfg)?;
    tracing::info!(
        channel_count = channels.len(),
        channels = ?channels.keys().map(|c| c.as_str()).collect::<Vec<_>>(),
        "channel adapters loaded"
    );

    let api_key = cfg.keys.openai_api_key.clone().unwrap_or_default();
    let client = CompletionClient::new(&api_key, &cfg.general.model);
    let responder = Responder::new(Arc::new(client), cfg.retry_policy(), cfg.prompt_settings());
    let admission = AdmissionController::new(cfg.sender_cooldown(), cfg.reply_cache_ttl());
    let pipeline = ReplyPipeline::new(admission, responder, channels);

    let state = Arc::new(WebhookState {
        pipeline,
        verify_token: cfg.webhook.verify_token.clone(),
        app_secret: cfg.webhook.app_secret.clone(),
        allow_unsigned: cfg.webhook.allow_unsigned,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = webhook::router(state, cfg.webhook.debug_routes)
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.runtime.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.runtime.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "riva serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");

    Ok(())
}

fn build_channel_adapters(
    cfg: &RivaConfig,
) -> Result<HashMap<Channel, Arc<dyn ChannelAdapter>>> {
    let mut channels: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    if cfg.channels.messenger.enabled {
        channels.insert(
            Channel::Messenger,
            Arc::new(GraphDirectAdapter::new(
                Channel::Messenger,
                &cfg.channels.messenger.access_token,
            )?),
        );
    }
    if cfg.channels.instagram.enabled {
        channels.insert(
            Channel::Instagram,
            Arc::new(GraphDirectAdapter::new(
                Channel::Instagram,
                &cfg.channels.instagram.access_token,
            )?),
        );
    }
    if cfg.channels.whatsapp.enabled {
        channels.insert(
            Channel::Whatsapp,
            Arc::new(WhatsAppCloudAdapter::new(
                &cfg.channels.whatsapp.access_token,
                &cfg.channels.whatsapp.phone_number_id,
            )?),
        );
    }
    if channels.is_empty() {
        return Err(anyhow::anyhow!(
            "no channels enabled; enable at least one of channels.messenger, channels.instagram, channels.whatsapp"
        ));
    }
    Ok(channels)
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl-c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        }
    }
}
