// Scripted MQTT 3.1.1 broker on a local socket. Speaks just enough of the
// protocol for one rumqttc client at a time.

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

#[derive(Debug, PartialEq)]
pub enum Packet {
    Publish { topic: String, payload: Vec<u8> },
    Subscribe { topics: Vec<String> },
    Disconnect,
    Other(u8),
}

pub struct FakeBroker {
    listener: TcpListener,
}

impl FakeBroker {
    pub async fn bind() -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind("127.0.0.1:0").await?,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Takes the next connection and hangs up before any CONNACK.
    pub async fn refuse(&self) -> Result<()> {
        let (stream, _) = self.listener.accept().await?;
        drop(stream);
        Ok(())
    }

    /// Takes the next connection and completes the handshake.
    pub async fn accept(&self) -> Result<BrokerSession> {
        let (stream, _) = self.listener.accept().await?;
        let mut session = BrokerSession { stream };

        match session.read_packet().await? {
            Some((header, _)) if header >> 4 == CONNECT => {}
            other => bail!("expected CONNECT, got {:?}", other.map(|(h, _)| h)),
        }
        session.stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

        Ok(session)
    }
}

pub struct BrokerSession {
    stream: TcpStream,
}

impl BrokerSession {
    /// Next packet from the client, acked where the protocol wants it.
    /// `None` once the client has gone.
    pub async fn next(&mut self) -> Result<Option<Packet>> {
        let Some((header, body)) = self.read_packet().await? else {
            return Ok(None);
        };

        let packet = match header >> 4 {
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let (topic, mut offset) = read_string(&body, 0)?;
                if qos > 0 {
                    let id = [body[offset], body[offset + 1]];
                    offset += 2;
                    // PUBACK, or PUBREC for QoS 2
                    let ack = if qos == 1 { 0x40 } else { 0x50 };
                    self.stream.write_all(&[ack, 0x02, id[0], id[1]]).await?;
                }
                Packet::Publish {
                    topic,
                    payload: body[offset..].to_vec(),
                }
            }
            SUBSCRIBE => {
                let id = [body[0], body[1]];
                let mut topics = Vec::new();
                let mut offset = 2;
                while offset < body.len() {
                    let (topic, next) = read_string(&body, offset)?;
                    topics.push(topic);
                    offset = next + 1; // requested qos
                }

                let mut suback = vec![0x90, 2 + topics.len() as u8, id[0], id[1]];
                suback.extend(std::iter::repeat(0x01).take(topics.len()));
                self.stream.write_all(&suback).await?;

                Packet::Subscribe { topics }
            }
            PINGREQ => {
                self.stream.write_all(&[0xd0, 0x00]).await?;
                Packet::Other(PINGREQ)
            }
            DISCONNECT => Packet::Disconnect,
            other => Packet::Other(other),
        };

        Ok(Some(packet))
    }

    /// Payloads published on `topic`, until `count` of them arrived or the
    /// client disconnects.
    pub async fn collect(&mut self, topic: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        let mut payloads = Vec::new();

        while payloads.len() < count {
            match self.next().await? {
                Some(Packet::Publish { topic: t, payload }) if t == topic => payloads.push(payload),
                Some(Packet::Disconnect) | None => break,
                Some(_) => {}
            }
        }

        Ok(payloads)
    }

    /// Topics of the next SUBSCRIBE.
    pub async fn next_subscription(&mut self) -> Result<Vec<String>> {
        loop {
            match self.next().await? {
                Some(Packet::Subscribe { topics }) => return Ok(topics),
                Some(_) => {}
                None => bail!("client left without subscribing"),
            }
        }
    }

    /// Sends a QoS 0 publish to the client.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);

        let mut packet = vec![PUBLISH << 4];
        let mut len = body.len();
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            packet.push(byte);
            if len == 0 {
                break;
            }
        }
        packet.extend_from_slice(&body);

        self.stream.write_all(&packet).await?;
        Ok(())
    }

    /// Closes our side and waits for the client to notice, so acks already
    /// written still reach it.
    pub async fn hang_up(mut self) -> Result<()> {
        self.stream.shutdown().await?;

        let mut rest = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.stream.read_to_end(&mut rest)).await;

        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        // eof and reset both mean the client is gone
        let Ok(header) = self.stream.read_u8().await else {
            return Ok(None);
        };

        let mut len = 0usize;
        for shift in [0, 7, 14, 21] {
            let byte = self.stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }

        let mut body = vec![0; len];
        self.stream.read_exact(&mut body).await?;

        Ok(Some((header, body)))
    }
}

fn read_string(body: &[u8], offset: usize) -> Result<(String, usize)> {
    if body.len() < offset + 2 {
        bail!("packet too short for a string at {}", offset);
    }
    let len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
    let start = offset + 2;
    if body.len() < start + len {
        bail!("string at {} runs past the packet", offset);
    }

    Ok((String::from_utf8_lossy(&body[start..start + len]).to_string(), start + len))
}
