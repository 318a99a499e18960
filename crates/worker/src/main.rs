use std::process::ExitCode;

use flowgen_core::{CoreError, SessionId, TaskId, TaskKind};
use flowgen_events::TaskEventKind;
use flowgen_stream::SessionOutcome;
use flowgen_worker::{Orchestrator, WorkerConfig};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
usage:
  flowgen-worker watch <kind> <task_id>
  flowgen-worker submit <resource_class> <kind> <input_json>
  flowgen-worker stream <request_json>";

enum Command {
    Watch { kind: TaskKind, task_id: TaskId },
    Submit { resource_class: String, kind: TaskKind, input: serde_json::Value },
    Stream { request: serde_json::Value },
}

fn parse_json(raw: &str) -> Result<serde_json::Value, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::Validation(format!("Invalid JSON argument: {e}")))
}

fn parse_args(args: &[String]) -> Result<Command, CoreError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["watch", kind, task_id] => Ok(Command::Watch {
            kind: kind.parse()?,
            task_id: TaskId::from(*task_id),
        }),
        ["submit", resource_class, kind, input] => Ok(Command::Submit {
            resource_class: resource_class.to_string(),
            kind: kind.parse()?,
            input: parse_json(input)?,
        }),
        ["stream", request] => Ok(Command::Stream {
            request: parse_json(request)?,
        }),
        _ => Err(CoreError::Validation(USAGE.to_string())),
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flowgen_worker=info,flowgen_queue=info,flowgen_poller=info,flowgen_stream=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(api_url = %config.api_url, "Worker starting");

    let orchestrator = Orchestrator::new(config);
    let code = match command {
        Command::Watch { kind, task_id } => {
            let events = orchestrator.subscribe();
            match orchestrator.watch(task_id.clone(), kind) {
                Ok(()) => follow(&orchestrator, events, task_id).await,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot watch task");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Submit { resource_class, kind, input } => {
            let events = orchestrator.subscribe();
            match orchestrator.submit(&resource_class, kind, input).await {
                Ok(task_id) => follow(&orchestrator, events, task_id).await,
                Err(e) => {
                    tracing::error!(error = %e, %resource_class, "Submission failed");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Stream { request } => stream(&orchestrator, request).await,
    };

    orchestrator.shutdown().await;
    code
}

/// Print every event of `task_id` until it is terminal. Ctrl-C stops
/// watching without cancelling the upstream task.
async fn follow(
    orchestrator: &Orchestrator,
    mut events: broadcast::Receiver<flowgen_events::TaskEvent>,
    task_id: TaskId,
) -> ExitCode {
    loop {
        let received = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(%task_id, "Interrupted, stopping watch");
                orchestrator.unwatch(&task_id);
                continue;
            }
            received = events.recv() => received,
        };

        match received {
            Ok(event) if event.task_id == task_id => {
                print_json(&event);
                if event.is_terminal() {
                    return match event.event {
                        TaskEventKind::Completed { .. } => ExitCode::SUCCESS,
                        TaskEventKind::Cancelled => ExitCode::from(130),
                        _ => ExitCode::FAILURE,
                    };
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return ExitCode::FAILURE,
        }
    }
}

/// Run one stream session, printing each update. Ctrl-C aborts it.
async fn stream(orchestrator: &Orchestrator, request: serde_json::Value) -> ExitCode {
    let session_id = SessionId::generate();
    let mut updates = match orchestrator.subscribe_session(&session_id).await {
        Ok((_, rx)) => rx,
        Err(e) => {
            tracing::error!(error = %e, "Cannot subscribe to session");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            print_json(&update);
        }
    });

    let result = orchestrator.stream(session_id, &request, &cancel).await;
    let _ = printer.await;

    match result {
        Ok(session) => match session.outcome() {
            Some(SessionOutcome::Completed { .. }) => ExitCode::SUCCESS,
            Some(SessionOutcome::Aborted) => ExitCode::from(130),
            _ => ExitCode::FAILURE,
        },
        Err(e) => {
            tracing::error!(error = %e, "Stream failed");
            ExitCode::FAILURE
        }
    }
}
