mod config;
mod device;
mod input;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use huddle_sync::{
    HttpMessageApi, PushConnector, SessionCoordinator, SessionIdentity, SessionUpdate,
    SyncConfig, TracingLogger, WsPushConnector,
};

use crate::config::ClientConfig;
use crate::input::{Input, render_message, render_state, render_status};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=info,huddle_sync=info,huddle_store=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;

    let store = Arc::new(device::open_store(&config.db_path));
    let sender_id = device::sender_id(&store, config.sender_id.clone());

    let mut api = HttpMessageApi::new(&config.server_url)?;
    if let Some(token) = &config.token {
        api = api.with_token(token);
    }
    let push = config.push_url.as_ref().map(|url| {
        let mut connector = WsPushConnector::new(url);
        if let Some(token) = &config.token {
            connector = connector.with_token(token);
        }
        Arc::new(connector) as Arc<dyn PushConnector>
    });

    let sync_config = SyncConfig {
        poll_interval: config.poll_interval,
        ..SyncConfig::default()
    };

    info!(
        "Joining {} as {} ({}) via {}",
        config.group, config.display_name, sender_id, config.server_url
    );
    let session = SessionCoordinator::start(
        SessionIdentity {
            group_id: config.group.clone(),
            sender_id,
            display_name: config.display_name.clone(),
        },
        store,
        Arc::new(api),
        push,
        sync_config,
        Arc::new(TracingLogger),
    );

    let printer = tokio::spawn(print_updates(session.subscribe()));
    for message in session.view().await? {
        println!("{}", render_message(&message));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Say(body) => {
                session.send_message(body).await?;
            }
            Input::History => {
                for message in session.history().await? {
                    println!("{}", render_message(&message));
                }
            }
            Input::Status => println!("-- {}", render_status(&session.status().await?)),
            Input::Reprobe => session.visibility_regained().await?,
            Input::Clear => session.clear_history().await?,
            Input::Quit => break,
            Input::Unknown(command) => {
                println!("-- unknown command /{command} (history, status, reprobe, clear, quit)")
            }
        }
    }

    session.leave().await?;
    printer.abort();
    Ok(())
}

async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>) {
    loop {
        match updates.recv().await {
            Ok(SessionUpdate::Messages(messages)) => {
                for message in messages {
                    println!("{}", render_message(&message));
                }
            }
            Ok(SessionUpdate::Confirmed(messages)) => {
                for message in messages {
                    println!("-- delivered: {}", message.body);
                }
            }
            Ok(SessionUpdate::SendFailed { error, .. }) => {
                println!("-- not delivered yet, will retry: {error}");
            }
            Ok(SessionUpdate::StateChanged(state)) => println!("-- {}", render_state(&state)),
            Ok(SessionUpdate::StorageFallback(error)) => {
                println!("-- {error}; this conversation will not be saved");
            }
            Ok(SessionUpdate::Cleared) => println!("-- history cleared"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Display fell behind, {} updates skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
