use clap::Parser;
use latchkey::cli::{
    build_config, build_providers, init_logging, load_jwt_secret, open_database,
    validate_public_origin, Args,
};
use latchkey::{init_sweeper, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(public_origin) = validate_public_origin(&args.public_origin) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let providers = build_providers(&args, &public_origin);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap();

    let sweeper = init_sweeper(&db).await;

    let config = build_config(db, &public_origin, jwt_secret, args.no_signup, providers);

    info!(address = %local_addr, "Listening");

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        sweeper.abort();
        std::process::exit(1);
    }

    sweeper.abort();
}
