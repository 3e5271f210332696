//! Agent bootstrap — personalized install scripts and agent file fetch.
//!
//! `GET /api/setup/:agentKey` returns a shell script, `/api/setup-win/` its
//! PowerShell counterpart, each baked with the requesting host and the
//! machine's agent key. The scripts pull the agent binary from
//! `/agent-files/` on the same host.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::AppState;
use fv_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/setup/{agent_key}", get(setup_script))
        .route("/setup-win/{agent_key}", get(setup_script_win))
        .with_state(state)
}

/// Top-level router for `/agent-files/*` (mounted outside `/api`).
pub fn files_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent-files/{filename}", get(agent_file))
        .with_state(state)
}

async fn resolve_host(state: &AppState, headers: &HeaderMap, agent_key: &str) -> AppResult<String> {
    state
        .users
        .get_by_agent_key(agent_key)
        .await
        .ok_or_else(|| AppError::NotFound("Unknown agent key".into()))?;

    Ok(headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:3456")
        .to_string())
}

async fn setup_script(
    State(state): State<Arc<AppState>>,
    Path(agent_key): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let host = resolve_host(&state, &headers, &agent_key).await?;
    let script = bash_script(&host, &agent_key);
    Ok((
        [
            (header::CONTENT_TYPE, "text/x-shellscript".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"install-farview-agent.sh\"".to_string(),
            ),
        ],
        script,
    ))
}

async fn setup_script_win(
    State(state): State<Arc<AppState>>,
    Path(agent_key): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let host = resolve_host(&state, &headers, &agent_key).await?;
    let script = powershell_script(&host, &agent_key);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"Install-FarViewAgent.ps1\"".to_string(),
            ),
        ],
        script,
    ))
}

fn bash_script(host: &str, agent_key: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
set -euo pipefail

# FarView Agent Installer
# Generated automatically — do not edit.

SERVER_URL="https://{host}"
AGENT_KEY="{agent_key}"
INSTALL_DIR="/opt/farview"
CONFIG_DIR="/etc/farview"

echo "FarView Agent Installer"

if [ "$(id -u)" -ne 0 ]; then
    echo "This installer must be run as root (use sudo)"
    exit 1
fi

OS="$(uname -s | tr '[:upper:]' '[:lower:]')"
ARCH="$(uname -m)"
case "$ARCH" in
    x86_64)        ARTIFACT="fv-agent-$OS-x86_64" ;;
    aarch64|arm64) ARTIFACT="fv-agent-$OS-aarch64" ;;
    *) echo "Unsupported architecture: $ARCH"; exit 1 ;;
esac

mkdir -p "$INSTALL_DIR" "$CONFIG_DIR"

echo "Downloading agent from $SERVER_URL/agent-files/$ARTIFACT ..."
curl -fSL -o "$INSTALL_DIR/fv-agent" "$SERVER_URL/agent-files/$ARTIFACT"
chmod +x "$INSTALL_DIR/fv-agent"

cat > "$CONFIG_DIR/agent.env" <<EOF
FV_SERVER_URL=$SERVER_URL
FV_AGENT_KEY=$AGENT_KEY
EOF

"$INSTALL_DIR/fv-agent" install --server-url "$SERVER_URL" --agent-key "$AGENT_KEY"

echo "FarView agent installed and running."
echo "   View logs: journalctl -u farview-agent -f"
"#
    )
}

fn powershell_script(host: &str, agent_key: &str) -> String {
    format!(
        r#"#Requires -RunAsAdministrator
# FarView Agent Installer for Windows
# Generated automatically — do not edit.

$ErrorActionPreference = "Stop"

$ServerUrl  = "https://{host}"
$AgentKey   = "{agent_key}"
$InstallDir = "$env:ProgramFiles\FarView"
$ConfigDir  = "$env:ProgramData\FarView"

Write-Host "FarView Agent Installer"

New-Item -ItemType Directory -Force -Path $InstallDir | Out-Null
New-Item -ItemType Directory -Force -Path $ConfigDir | Out-Null

$DownloadUrl = "$ServerUrl/agent-files/fv-agent-windows-x86_64.exe"
Write-Host "Downloading agent from $DownloadUrl ..."
[Net.ServicePointManager]::SecurityProtocol = [Net.SecurityProtocolType]::Tls12
Invoke-WebRequest -Uri $DownloadUrl -OutFile "$InstallDir\fv-agent.exe" -UseBasicParsing

$ConfigContent = @"
FV_SERVER_URL=$ServerUrl
FV_AGENT_KEY=$AgentKey
"@
Set-Content -Path "$ConfigDir\agent.env" -Value $ConfigContent

& "$InstallDir\fv-agent.exe" install --server-url $ServerUrl --agent-key $AgentKey --silent

Write-Host "FarView agent installed and running."
Write-Host "   Status: sc.exe query farview-agent"
"#
    )
}

/// Serve an agent file used by the bootstrap scripts.
///
/// Only `fv-agent-*` filenames inside the configured directory are served;
/// anything else is 404.
async fn agent_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    if !filename.starts_with("fv-agent") || filename.contains("..") || filename.contains('/') {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    let file_path = std::path::PathBuf::from(&state.config.agent_files_dir).join(&filename);
    let data = match tokio::fs::read(&file_path).await {
        Ok(d) => d,
        Err(_) => {
            tracing::warn!("Agent file not found: {}", file_path.display());
            return (StatusCode::NOT_FOUND, "Agent file not found").into_response();
        }
    };

    let len = data.len();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from(data),
    )
        .into_response()
}
