//! Valhaj REPL
//!
//! A small interactive client: reads one command per stdin line, executes
//! it against a running server and prints every response fragment on its
//! own line. Exits on EOF or after sending QUIT.

use tokio::io::{AsyncBufReadExt, BufReader};
use valhaj::client;
use valhaj::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Trying {} via tcp", config::REPL_ADDRESS);
    let mut connection = client::connect_tcp(config::REPL_ADDRESS).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(query) = lines.next_line().await? {
        let fragments = match connection.exec(&query).await {
            Ok(fragments) => fragments,
            Err(err) => {
                println!("{err}");
                break;
            }
        };
        for fragment in fragments {
            println!("{fragment}");
        }

        if query.trim().eq_ignore_ascii_case("QUIT") {
            break;
        }
    }

    Ok(())
}
