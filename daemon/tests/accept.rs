use clap::Parser;
use common::{DispatchResponse, JobId, ResolvedReference, WatchRequest};
use lunaflow_daemon::cli::{accept_request, Cli, Commands};
use std::path::Path;

fn request() -> WatchRequest {
    let mut request = WatchRequest::new(
        ResolvedReference {
            job_id: JobId::from("3b9f2c1e-0d4a-4c55-9a51-7e2f8d1c6a10"),
            server_url: "http://cromwell:8000".to_string(),
        },
        "ops@example.org",
        "ops@laptop",
    );
    request.poll_interval_secs = Some(15);
    request
}

fn parse(args: &[String]) -> Cli {
    Cli::try_parse_from(std::iter::once("lunaflow-daemon".to_string()).chain(args.iter().cloned()))
        .unwrap_or_else(|e| panic!("daemon rejected {:?}: {}", args, e))
}

#[test]
fn watch_args_parse_back_into_the_same_request() {
    let cli = parse(&request().to_watch_args(Some(Path::new("/srv/lunaflow.yaml"))));
    assert_eq!(cli.config.as_deref(), Some(Path::new("/srv/lunaflow.yaml")));
    match cli.command {
        Commands::Watch(args) => assert_eq!(args.into_request(), request()),
        other => panic!("expected watch, got {:?}", other),
    }
}

#[test]
fn watch_args_without_config() {
    let cli = parse(&request().to_watch_args(None));
    assert!(cli.config.is_none());
    assert!(matches!(cli.command, Commands::Watch(_)));
}

#[test]
fn accept_starts_watcher_with_parseable_args() {
    let input = serde_json::to_string(&request()).unwrap();
    let mut seen = Vec::new();

    let response = accept_request(&input, |args| {
        seen = args.to_vec();
        Ok(4242)
    });

    match response {
        DispatchResponse::Started(receipt) => assert_eq!(receipt.pid, 4242),
        DispatchResponse::Error(e) => panic!("accept failed: {}", e),
    }
    match parse(&seen).command {
        Commands::Watch(args) => assert_eq!(args.into_request(), request()),
        other => panic!("expected watch, got {:?}", other),
    }
}

#[test]
fn accept_rejects_malformed_request() {
    let mut spawned = false;
    let response = accept_request("{\"job_id\": ", |_| {
        spawned = true;
        Ok(1)
    });

    match response {
        DispatchResponse::Error(e) => assert!(e.contains("Malformed watch request"), "{}", e),
        DispatchResponse::Started(_) => panic!("malformed request was accepted"),
    }
    assert!(!spawned);

    let line = serde_json::to_string(&accept_request("not json", |_| Ok(1))).unwrap();
    assert!(line.starts_with("{\"Error\":"));
}

#[test]
fn accept_reports_spawn_failure() {
    let input = serde_json::to_string(&request()).unwrap();
    let response = accept_request(&input, |_| {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
    });
    match response {
        DispatchResponse::Error(e) => {
            assert!(e.contains("3b9f2c1e-0d4a-4c55-9a51-7e2f8d1c6a10"));
            assert!(e.contains("no such file"));
        }
        DispatchResponse::Started(_) => panic!("spawn failure was reported as started"),
    }
}
