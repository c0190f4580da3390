/*!
Minimal in-process MQTT 3.1.1 broker for connector tests

Accepts one client connection at a time, acknowledges CONNECT, SUBSCRIBE,
UNSUBSCRIBE, PUBLISH (QoS 1 and 2) and PINGREQ, and records what the client
sent. Messages can be pushed to the connected client with
[`FakeBroker::publish_to_client`]; [`FakeBroker::drop_connection`] cuts the
current TCP session to exercise reconnects.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

#[derive(Debug, Default, Clone)]
pub struct BrokerLog {
    pub connects: usize,
    pub disconnects: usize,
    /// Topic filters currently registered, in subscription order
    pub subscriptions: Vec<String>,
    pub subscribe_requests: usize,
    pub published: Vec<BrokerPublish>,
}

enum Control {
    Packet(Vec<u8>),
    Drop,
}

pub struct FakeBroker {
    port: u16,
    log: Arc<Mutex<BrokerLog>>,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let log = Arc::new(Mutex::new(BrokerLog::default()));
        let (control, control_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(serve(listener, log.clone(), control_rx));
        debug!("Fake broker listening on 127.0.0.1:{}", port);
        Ok(Self { port, log, control, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log(&self) -> BrokerLog {
        self.log.lock().clone()
    }

    /// Sends a QoS 0 PUBLISH to the connected client
    pub fn publish_to_client(&self, topic: &str, payload: &[u8]) {
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);
        self.send(Control::Packet(frame(0x30, &body)));
    }

    /// Closes the current client connection without a DISCONNECT
    pub fn drop_connection(&self) {
        self.send(Control::Drop);
    }

    fn send(&self, control: Control) {
        if self.control.send(control).is_err() {
            debug!("Fake broker on port {} is no longer running, control message dropped", self.port);
        }
    }

    /// Polls the log until `check` holds or `timeout` expires
    pub async fn wait_for<F>(&self, timeout: Duration, check: F) -> bool
    where
        F: Fn(&BrokerLog) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check(&*self.log.lock()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check(&*self.log.lock())
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    packet
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;
    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    loop {
        let byte = reader.read_u8().await?;
        remaining += (byte & 0x7f) as usize * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }
    let mut body = vec![0; remaining];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

fn read_string(body: &[u8], offset: &mut usize) -> Option<String> {
    let len = u16::from_be_bytes([*body.get(*offset)?, *body.get(*offset + 1)?]) as usize;
    let start = *offset + 2;
    let text = String::from_utf8(body.get(start..start + len)?.to_vec()).ok()?;
    *offset = start + len;
    Some(text)
}

/// Records the packet and returns the broker's answer, if any
fn respond(header: u8, body: &[u8], log: &Mutex<BrokerLog>) -> Option<Vec<u8>> {
    match header >> 4 {
        1 => {
            log.lock().connects += 1;
            Some(vec![0x20, 0x02, 0x00, 0x00])
        }
        3 => {
            let qos = (header >> 1) & 0x03;
            let mut offset = 0;
            let topic = read_string(body, &mut offset)?;
            let pkid = if qos > 0 {
                let id = body.get(offset..offset + 2)?.to_vec();
                offset += 2;
                id
            } else {
                Vec::new()
            };
            log.lock().published.push(BrokerPublish {
                topic,
                payload: body.get(offset..)?.to_vec(),
                qos,
            });
            match qos {
                1 => Some([vec![0x40, 0x02], pkid].concat()),
                2 => Some([vec![0x50, 0x02], pkid].concat()),
                _ => None,
            }
        }
        // PUBREL
        6 => Some([vec![0x70, 0x02], body.get(0..2)?.to_vec()].concat()),
        8 => {
            let mut offset = 2;
            let mut granted = Vec::new();
            let mut log = log.lock();
            log.subscribe_requests += 1;
            while offset < body.len() {
                let topic = read_string(body, &mut offset)?;
                granted.push(*body.get(offset)?);
                offset += 1;
                if !log.subscriptions.contains(&topic) {
                    log.subscriptions.push(topic);
                }
            }
            let ack = [body.get(0..2)?.to_vec(), granted].concat();
            Some(frame(0x90, &ack))
        }
        10 => {
            let mut offset = 2;
            let mut log = log.lock();
            while offset < body.len() {
                let topic = read_string(body, &mut offset)?;
                log.subscriptions.retain(|existing| existing != &topic);
            }
            Some([vec![0xB0, 0x02], body.get(0..2)?.to_vec()].concat())
        }
        12 => Some(vec![0xD0, 0x00]),
        _ => None,
    }
}

async fn serve(listener: TcpListener, log: Arc<Mutex<BrokerLog>>, mut control: mpsc::UnboundedReceiver<Control>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (mut reader, mut writer) = stream.into_split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let reader_log = log.clone();
        let reader_task = tokio::spawn(async move {
            while let Ok((header, body)) = read_packet(&mut reader).await {
                if header >> 4 == 14 {
                    reader_log.lock().disconnects += 1;
                    break;
                }
                if let Some(reply) = respond(header, &body, &reader_log) {
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(bytes) => {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                command = control.recv() => match command {
                    Some(Control::Packet(bytes)) => {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::Drop) => break,
                    None => return,
                },
            }
        }

        reader_task.abort();
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_remaining_length() {
        assert_eq!(frame(0x30, &[1, 2]), vec![0x30, 0x02, 1, 2]);

        let long = frame(0x30, &[0; 200]);
        assert_eq!(&long[..3], &[0x30, 0xC8, 0x01]);
        assert_eq!(long.len(), 203);
    }

    #[test]
    fn test_subscribe_is_acknowledged() {
        let log = Mutex::new(BrokerLog::default());
        let mut body = vec![0x00, 0x07];
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"a/b");
        body.push(1);

        let ack = respond(0x82, &body, &log).unwrap();
        assert_eq!(ack, vec![0x90, 0x03, 0x00, 0x07, 0x01]);
        assert_eq!(log.lock().subscriptions, vec!["a/b".to_string()]);
    }

    #[tokio::test]
    async fn test_control_after_broker_stopped() {
        crate::init_tracing();
        let broker = FakeBroker::start().await.unwrap();
        broker.task.abort();
        while !broker.control.is_closed() {
            tokio::task::yield_now().await;
        }

        broker.publish_to_client("a/b", b"{}");
        broker.drop_connection();
        assert_eq!(broker.log().connects, 0);
    }
}
