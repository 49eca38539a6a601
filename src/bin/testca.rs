#[macro_use]
extern crate log;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    info!("bjorn testca version {} starting up...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1);
    let config = match testca::Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };

    let validator = Arc::new(testca::validator::StaticValidator::from_config(&config));
    let engine = match testca::Engine::new(config, validator) {
        Ok(e) => e,
        Err(err) => {
            error!("Unable to set up the CA: {}", err);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&engine.capabilities()) {
        Ok(caps) => info!("Capabilities: {}", caps),
        Err(err) => warn!("Unable to render capabilities: {}", err),
    }

    for index in 0..engine.ca().chain_count() {
        let pems = engine.ca().root_pem(index)
            .and_then(|root| engine.ca().intermediate_pem(index).map(|intermediate| (root, intermediate)));
        match pems {
            Ok((root, intermediate)) => {
                println!("# Root {}\n{}", index, root);
                println!("# Intermediate {}\n{}", index, intermediate);
            }
            Err(err) => {
                error!("Unable to export chain {}: {}", index, err);
                std::process::exit(1);
            }
        }
    }
}
