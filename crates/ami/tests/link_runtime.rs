use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use switchboard_ami::{
    CallOriginator, LinkState, ManagerLink, ManagerSettings, OriginateSettings, ReconnectPolicy,
};
use switchboard_core::{CallDialer, OriginateResult, RejectReason};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

fn settings(port: u16) -> ManagerSettings {
    ManagerSettings {
        host: "127.0.0.1".to_owned(),
        port,
        username: "switchboard".to_owned(),
        secret: SecretString::from("amp111".to_owned()),
        connect_timeout: Duration::from_secs(2),
        action_timeout: Duration::from_secs(2),
    }
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.expect("read line");
        assert!(read > 0, "client hung up mid-frame");
        let line = line.trim_end();
        if line.is_empty() {
            return headers;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_owned(), value.trim().to_owned()));
        }
    }
}

fn header<'a>(frame: &'a [(String, String)], key: &str) -> &'a str {
    frame.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str()).unwrap_or("")
}

async fn greet_and_login(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> Vec<(String, String)> {
    writer.write_all(b"Asterisk Call Manager/7.0.3\r\n").await.expect("banner");
    let login = read_frame(reader).await;
    let reply = format!(
        "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
        header(&login, "ActionID")
    );
    writer.write_all(reply.as_bytes()).await.expect("login reply");
    login
}

#[tokio::test]
async fn originate_over_tcp_round_trips_through_the_fake_pbx() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let pbx = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let login = greet_and_login(&mut reader, &mut writer).await;
        assert_eq!(header(&login, "Username"), "switchboard");
        assert_eq!(header(&login, "Secret"), "amp111");

        let originate = read_frame(&mut reader).await;
        let reply = format!(
            "Event: Newchannel\r\nCallerIDNum: 1001\r\n\r\n\
             Response: Success\r\nActionID: {}\r\nMessage: Originate successfully queued\r\n\r\n",
            header(&originate, "ActionID")
        );
        writer.write_all(reply.as_bytes()).await.expect("originate reply");
        originate
    });

    let link = ManagerLink::connect(settings(port), ReconnectPolicy::default())
        .await
        .expect("link connects");
    let originator = CallOriginator::new(Arc::new(link.clone()), OriginateSettings::default());

    let result = originator.originate("1001", "1002").await;
    assert!(result.is_accepted(), "unexpected outcome: {result:?}");

    let originate = pbx.await.expect("pbx task");
    assert_eq!(header(&originate, "Action"), "Originate");
    assert_eq!(header(&originate, "Channel"), "PJSIP/1001");
    assert_eq!(header(&originate, "Exten"), "1002");
    assert_eq!(header(&originate, "Priority"), "1");

    link.shutdown().await;
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn originate_while_pbx_is_down_is_rejected_quickly() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let link = ManagerLink::spawn(
        settings(port),
        ReconnectPolicy { base_delay_ms: 100, max_delay_ms: 500 },
    );
    let originator = CallOriginator::new(Arc::new(link.clone()), OriginateSettings::default());

    let started = tokio::time::Instant::now();
    let result = originator.originate("1001", "1002").await;

    assert_eq!(result, OriginateResult::Rejected(RejectReason::ConnectionUnavailable));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_ne!(link.state(), LinkState::Authenticated);

    link.shutdown().await;
}

#[tokio::test]
async fn spawned_link_recovers_once_the_pbx_comes_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let link = ManagerLink::spawn(
        settings(port),
        ReconnectPolicy { base_delay_ms: 10, max_delay_ms: 50 },
    );
    let mut events = link.subscribe_events();

    let pbx = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        greet_and_login(&mut reader, &mut writer).await;
        writer
            .write_all(b"Event: Newchannel\r\nCallerIDNum: 0600000000\r\nCallerIDName: Durand\r\n\r\n")
            .await
            .expect("event");
        (reader, writer)
    });

    let event = tokio::time::timeout(Duration::from_secs(3), events.next())
        .await
        .expect("event in time")
        .expect("event");
    let call = event.as_inbound_call().expect("inbound call");
    assert_eq!(call.caller_number, "0600000000");
    assert_eq!(call.caller_name, "Durand");

    let _connection = pbx.await.expect("pbx task");
    link.shutdown().await;
}
