use gosub_fetch::client::{map_response, Client};
use gosub_fetch::config::ClientConfig;
use gosub_fetch::transport::network::{Clients, ReqwestTransfer};
use gosub_fetch::{Dispatch, Interceptor, Next, Payload, Request, RequestOptions, ResponseType};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/json".to_string());

    // Relative URLs given on the command line are resolved against this host.
    let config = ClientConfig::builder()
        .host("https://httpbin.org")
        .timeout(Duration::from_secs(15))
        .user_agent("gosub-fetch/0.1")
        .build()?;

    // Every request gets its own transfer; the reqwest clients (and their cookies) are shared.
    let clients = Clients::new()?;
    let mut client = Client::new(config, move || Arc::new(ReqwestTransfer::with_clients(clients.clone())));

    // A named interceptor that logs how long each request takes.
    client.register_interceptor(
        "timing",
        Interceptor::new(|request: Request, next: Next<Request, Dispatch>| {
            let started = Instant::now();
            let target = request.url().to_string();
            map_response(next.run(request), move |outcome| {
                log::info!("{target} settled in {:?}", started.elapsed());
                outcome
            })
        }),
    );

    let options = RequestOptions::new()
        .response_type(ResponseType::Json)
        .interceptor(Interceptor::named("timing"))
        .on_progress(|ev| log::debug!("{} {:.0}%", ev.event_type(), ev.percent_completed() * 100.0));

    match client.request(Request::get(url).with_options(options))?.await {
        Ok(response) => {
            println!("{} {}", response.status(), response.status_text());
            for (name, value) in response.headers().iter() {
                println!("{name}: {value}");
            }
            println!();
            match response.body() {
                Payload::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
                Payload::Text(text) => println!("{text}"),
                Payload::Bytes(bytes) => println!("<{} bytes>", bytes.len()),
                Payload::Empty => {}
            }
        }
        Err(error) => {
            eprintln!("request failed: {error}");
            eprintln!("{:?}", error.error());
        }
    }

    Ok(())
}
