use clap::Parser;

use coderun::config::{CliArgs, Config};
use coderun::engine::ExecutionEngine;
use coderun::generate::GenerateClient;
use coderun::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        execution: execution_config,
        languages: language_config,
        generate: generate_config,
    } = cli.to_config().expect("Failed to load configuration");

    let engine = ExecutionEngine::from_config(&execution_config, language_config)
        .expect("Failed to build the runtime registry");
    let generator =
        GenerateClient::from_config(generate_config).expect("Failed to build the provider client");

    let server = build_server(server_config, engine, generator).expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight executions finish and tear down their instances before we exit
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
