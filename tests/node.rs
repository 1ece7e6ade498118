use coap_lite::{
    CoapRequest, ContentFormat, MessageClass, MessageType, ObserveOption, Packet,
    RequestType as Method, ResponseType as Status,
};
use coap_sensor_node::sensor::{SensorParams, SimulatedBme280};
use coap_sensor_node::shell::Capture;
use coap_sensor_node::{Console, Node, NodeConfig, RequestOptions, Shell, ShellCommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn start_node(sensor: bool) -> Node {
    start_node_with_period(sensor, Duration::from_millis(100)).await
}

async fn start_node_with_period(sensor: bool, notify_period: Duration) -> Node {
    let sensor = if sensor {
        let mut sensor = SimulatedBme280::new(SensorParams::default());
        sensor.start().unwrap();
        Some(Box::new(sensor) as Box<dyn coap_sensor_node::sensor::EnvironmentSensor>)
    } else {
        None
    };
    let config = NodeConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        notify_period,
        request: RequestOptions {
            retries: 2,
            timeout: Duration::from_millis(500),
        },
        ..NodeConfig::default()
    };
    Node::start(config, sensor).await.unwrap()
}

fn get(path: &str, message_id: u16, token: &[u8], observe: Option<ObserveOption>) -> Vec<u8> {
    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.set_method(Method::Get);
    request.set_path(path);
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = message_id;
    request.message.set_token(token.to_vec());
    if let Some(observe) = observe {
        request.set_observe_flag(observe);
    }
    request.message.to_bytes().unwrap()
}

async fn receive(socket: &UdpSocket) -> Packet {
    let mut buf = vec![0u8; 1600];
    let (n, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no datagram received")
        .unwrap();
    Packet::from_bytes(&buf[..n]).unwrap()
}

async fn wait_for(capture: &Capture, needle: &str) -> String {
    for _ in 0..100 {
        let output = capture.contents();
        if output.contains(needle) {
            return output;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{:?} never printed, got {:?}", needle, capture.contents());
}

#[tokio::test]
async fn test_sensor_resources() {
    let node = start_node(true).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for (i, path) in ["/temperature", "/pressure", "/humidity"].iter().enumerate() {
        socket
            .send_to(&get(path, i as u16, b"t", None), node.local_addr())
            .await
            .unwrap();
        let response = receive(&socket).await;
        assert_eq!(response.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(response.header.message_id, i as u16);
        assert_eq!(
            response.header.code,
            MessageClass::Response(Status::Content)
        );
        assert_eq!(
            response.get_content_format(),
            Some(ContentFormat::TextPlain)
        );
        let text = String::from_utf8(response.payload).unwrap();
        assert!(text.parse::<f64>().is_ok(), "{} answered {:?}", path, text);
    }

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_sensor_is_unavailable() {
    let node = start_node(false).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket
        .send_to(&get("/temperature", 1, b"t", None), node.local_addr())
        .await
        .unwrap();
    let response = receive(&socket).await;
    assert_eq!(
        response.header.code,
        MessageClass::Response(Status::ServiceUnavailable)
    );

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shell_request_against_node() {
    let node = start_node(true).await;
    let (console, capture) = Console::capture();
    let shell = Shell::new(vec![Box::new(node.coap_command())], console);

    let line = format!("coap get 127.0.0.1 {} /cli/stats", node.local_addr().port());
    assert_eq!(shell.execute(&line).await, Some(0));

    let output = wait_for(&capture, "coap: response").await;
    assert!(output.starts_with("coap_cli: sending msg ID "));
    assert!(output.contains("coap: response Success, code 2.05, 1 bytes\n1\n"));
    assert_eq!(node.state().requests_sent(), 1);

    let url = format!("coap://127.0.0.1:{}/nothing", node.local_addr().port());
    assert_eq!(shell.execute(&format!("coap get {}", url)).await, Some(0));
    wait_for(&capture, "coap: response Error, code 4.04, 9 bytes\nNot found").await;

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_observe_stats() {
    let node = start_node_with_period(true, Duration::from_millis(300)).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket
        .send_to(
            &get("/cli/stats", 9, b"ob", Some(ObserveOption::Register)),
            node.local_addr(),
        )
        .await
        .unwrap();
    let registered = receive(&socket).await;
    assert_eq!(registered.header.message_id, 9);
    assert_eq!(registered.get_observe_value().unwrap().unwrap(), 0);

    let notification = receive(&socket).await;
    assert_eq!(notification.header.get_type(), MessageType::NonConfirmable);
    assert_eq!(notification.get_token(), b"ob");
    let tick: u32 = String::from_utf8(notification.payload.clone())
        .unwrap()
        .parse()
        .unwrap();
    assert!(tick >= 1);
    assert!(tick <= node.state().ticks());
    let sequence = notification.get_observe_value().unwrap().unwrap();
    assert!(sequence >= 1);

    // a Reset in answer to a notification cancels the observation
    let mut reset = Packet::new();
    reset.header.set_type(MessageType::Reset);
    reset.header.code = MessageClass::Empty;
    reset.header.message_id = notification.header.message_id;
    socket
        .send_to(&reset.to_bytes().unwrap(), node.local_addr())
        .await
        .unwrap();

    let command = node.coap_command();
    let args: Vec<String> = vec!["coap".into(), "info".into()];
    let mut info = String::new();
    for _ in 0..50 {
        let (console, capture) = Console::capture();
        command.run(&args, &console).await;
        info = capture.contents();
        if info.contains("    CoAP observers: 0\n") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(info.contains("    CoAP observers: 0\n"), "{}", info);

    node.shutdown().await.unwrap();
}
