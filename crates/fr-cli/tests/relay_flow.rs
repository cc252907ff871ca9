//! End-to-end tests for the bot coordinator against an in-process IRC server.

use std::time::Duration;

use fr_cli::{Config, bot};
use fr_core::PolledItem;
use fr_db::Ledger;
use fr_feed::{FeedError, FeedSource};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;

/// Feed that always returns the same newest item, or nothing.
struct FixedSource(Option<PolledItem>);

impl FeedSource for FixedSource {
    async fn latest_item(&self, identity: &str) -> Result<PolledItem, FeedError> {
        self.0.clone().ok_or_else(|| FeedError::Empty {
            identity: identity.to_string(),
        })
    }
}

fn item() -> PolledItem {
    PolledItem {
        external_id: "42".to_string(),
        source_identity: "newsyc150".to_string(),
        display_name: "Foo".to_string(),
        body: "bar".to_string(),
    }
}

fn config(port: u16, temp: &tempfile::TempDir) -> Config {
    Config {
        server: "127.0.0.1".to_string(),
        port,
        channel: "#news".to_string(),
        nick: "relaybot".to_string(),
        realname: "Feed Relay".to_string(),
        join_delay_ms: 0,
        quit_timeout_secs: 2,
        database_path: temp.path().join("ledger.db"),
        ..Config::default()
    }
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for a line from the bot")
        .unwrap()
        .expect("bot closed the connection")
}

async fn expect_handshake(lines: &mut Lines<BufReader<OwnedReadHalf>>) {
    assert_eq!(next_line(lines).await, "NICK relaybot");
    assert_eq!(next_line(lines).await, "USER relaybot 0 * :Feed Relay");
    assert_eq!(next_line(lines).await, "JOIN #news");
}

#[tokio::test]
async fn relays_new_item_answers_ping_and_quits_on_operator_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let config = config(listener.local_addr().unwrap().port(), &temp);
    let ledger = Ledger::open(&config.database_path).unwrap();
    let (mut console, console_in) = tokio::io::duplex(1024);

    let bot = {
        let config = config.clone();
        tokio::spawn(async move {
            bot::run(
                &config,
                ledger,
                FixedSource(Some(item())),
                BufReader::new(console_in),
                std::io::sink(),
                CancellationToken::new(),
            )
            .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    expect_handshake(&mut lines).await;

    write_half.write_all(b"PING :abc123\r\n").await.unwrap();
    let mut received = vec![next_line(&mut lines).await, next_line(&mut lines).await];
    received.sort();
    assert_eq!(
        received,
        vec!["PONG :abc123", "PRIVMSG #news :Foo (@newsyc150): bar"]
    );

    console.write_all(b"hello everyone\n/dance\n/quit bye\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await, "PRIVMSG #news :hello everyone");
    assert_eq!(next_line(&mut lines).await, "QUIT :bye");

    write_half
        .write_all(b"ERROR :Closing Link: relaybot (Quit: bye)\r\n")
        .await
        .unwrap();
    drop(write_half);
    drop(lines);

    tokio::time::timeout(Duration::from_secs(10), bot)
        .await
        .expect("bot should exit after quit")
        .unwrap()
        .unwrap();

    let ledger = Ledger::open(&config.database_path).unwrap();
    assert!(ledger.lookup("42").unwrap().unwrap().delivered);
}

#[tokio::test]
async fn already_delivered_item_is_not_relayed_after_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let config = config(listener.local_addr().unwrap().port(), &temp);
    {
        let mut ledger = Ledger::open(&config.database_path).unwrap();
        ledger.record_seen("42", "newsyc150").unwrap();
        ledger.mark_delivered("42").unwrap();
    }
    let ledger = Ledger::open(&config.database_path).unwrap();
    let (mut console, console_in) = tokio::io::duplex(1024);

    let bot = {
        let config = config.clone();
        tokio::spawn(async move {
            bot::run(
                &config,
                ledger,
                FixedSource(Some(item())),
                BufReader::new(console_in),
                std::io::sink(),
                CancellationToken::new(),
            )
            .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    expect_handshake(&mut lines).await;

    console.write_all(b"/quit\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await, "QUIT");
    drop(write_half);
    drop(lines);

    tokio::time::timeout(Duration::from_secs(10), bot)
        .await
        .expect("bot should exit after quit")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn interrupt_sends_farewell_and_exits_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let config = config(listener.local_addr().unwrap().port(), &temp);
    let ledger = Ledger::open(&config.database_path).unwrap();
    let (_console, console_in) = tokio::io::duplex(1024);
    let shutdown = CancellationToken::new();

    let bot = {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            bot::run(
                &config,
                ledger,
                FixedSource(None),
                BufReader::new(console_in),
                std::io::sink(),
                shutdown,
            )
            .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    expect_handshake(&mut lines).await;

    shutdown.cancel();
    assert_eq!(next_line(&mut lines).await, "QUIT :shutting down");
    drop(write_half);
    drop(lines);

    tokio::time::timeout(Duration::from_secs(10), bot)
        .await
        .expect("bot should exit after interrupt")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn lost_connection_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let temp = tempfile::tempdir().unwrap();
    let config = config(listener.local_addr().unwrap().port(), &temp);
    let ledger = Ledger::open(&config.database_path).unwrap();
    let (_console, console_in) = tokio::io::duplex(1024);

    let bot = {
        let config = config.clone();
        tokio::spawn(async move {
            bot::run(
                &config,
                ledger,
                FixedSource(None),
                BufReader::new(console_in),
                std::io::sink(),
                CancellationToken::new(),
            )
            .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    expect_handshake(&mut lines).await;
    drop(write_half);
    drop(lines);

    let result = tokio::time::timeout(Duration::from_secs(10), bot)
        .await
        .expect("bot should exit when the server goes away")
        .unwrap();
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("lost connection"));
}
