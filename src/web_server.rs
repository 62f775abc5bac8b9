use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::engine::ExecutionEngine;
use crate::generate::GenerateClient;
use crate::routes::{json_error_handler, post_execute_handler, post_generate_handler};

pub fn build_server(
    server_config: ServerConfig,
    engine: ExecutionEngine,
    generator: GenerateClient,
) -> std::io::Result<Server> {
    let engine = web::Data::new(engine);
    let generator = web::Data::new(generator);

    let bind_address = server_config
        .bind_address
        .unwrap_or("127.0.0.1".to_string());
    let bind_port = server_config.bind_port.unwrap_or(12345);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .app_data(generator.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_execute_handler)
            .service(post_generate_handler)
    })
    .bind((bind_address.as_str(), bind_port))?
    .run();

    log::info!("Listening on {bind_address}:{bind_port}");
    Ok(server)
}
