//! SNMP v2c transport over UDP.
//!
//! A deliberately small client: community-string auth, GET and GETBULK,
//! definite-length BER only. That is everything the LLDP probe needs; walks
//! are driven by repeated GETBULK requests until the replies leave the
//! requested subtree.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use topo_types::{
    SessionFactory, SessionSettings, SnmpTransport, SnmpValue, TransportError, WalkRow,
};
use tracing::{debug, trace};

const SNMP_VERSION_2C: i64 = 1;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;
const TAG_GET_REQUEST: u8 = 0xa0;
const TAG_GET_RESPONSE: u8 = 0xa2;
const TAG_GET_BULK_REQUEST: u8 = 0xa5;

/// Session-unique request ids; shared across sessions so a late reply to
/// one session can never validate against another.
static REQUEST_IDS: AtomicI64 = AtomicI64::new(1);

/// Produces UDP sessions carrying the scan's shared SNMP parameters.
#[derive(Debug, Clone)]
pub struct SnmpSessionFactory {
    settings: SessionSettings,
}

impl SnmpSessionFactory {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }
}

impl SessionFactory for SnmpSessionFactory {
    type Session = SnmpSession;

    fn session(&self, target: &str) -> SnmpSession {
        SnmpSession {
            target: target.to_string(),
            settings: self.settings.clone(),
            socket: None,
        }
    }
}

/// One SNMP v2c session against a single device.
pub struct SnmpSession {
    target: String,
    settings: SessionSettings,
    socket: Option<UdpSocket>,
}

#[async_trait]
impl SnmpTransport for SnmpSession {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((self.target.as_str(), self.settings.port))
            .await
            .map_err(|e| TransportError::Connect {
                target: self.target.clone(),
                reason: e.to_string(),
            })?;
        self.socket = Some(socket);
        debug!(target = %self.target, "snmp session opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        Ok(())
    }

    async fn get(&mut self, oids: &[&str]) -> Result<Vec<SnmpValue>, TransportError> {
        let request_id = next_request_id();
        let packet = encode_message(
            TAG_GET_REQUEST,
            &self.settings.community,
            request_id,
            0,
            0,
            oids,
        )?;
        let pdu = self.request(&packet, request_id).await?;
        if pdu.error_status != 0 {
            return Err(TransportError::Protocol {
                target: self.target.clone(),
                reason: format!(
                    "error-status {} at index {}",
                    pdu.error_status, pdu.error_index
                ),
            });
        }
        Ok(pdu.varbinds.into_iter().map(|(_, value)| value).collect())
    }

    async fn bulk_walk(&mut self, oid: &str) -> Result<Vec<WalkRow>, TransportError> {
        let mut rows = Vec::new();
        let mut current = oid.to_string();
        loop {
            let request_id = next_request_id();
            let packet = encode_message(
                TAG_GET_BULK_REQUEST,
                &self.settings.community,
                request_id,
                0,
                i64::from(self.settings.max_repetitions),
                &[current.as_str()],
            )?;
            let pdu = self.request(&packet, request_id).await?;
            if pdu.error_status != 0 {
                return Err(TransportError::Protocol {
                    target: self.target.clone(),
                    reason: format!("error-status {} during walk", pdu.error_status),
                });
            }
            if pdu.varbinds.is_empty() {
                break;
            }
            let mut advanced = false;
            let mut done = false;
            for (instance, value) in pdu.varbinds {
                if value == SnmpValue::EndOfMibView || !is_under(oid, &instance) {
                    done = true;
                    break;
                }
                // A non-advancing agent would loop forever.
                if instance == current {
                    done = true;
                    break;
                }
                current = instance.clone();
                advanced = true;
                rows.push(WalkRow {
                    oid: instance,
                    value,
                });
            }
            if done || !advanced {
                break;
            }
        }
        trace!(target = %self.target, base = oid, rows = rows.len(), "walk finished");
        Ok(rows)
    }
}

impl SnmpSession {
    /// Sends `packet` and waits for the matching response, retrying on
    /// timeout up to the session's retry budget.
    async fn request(
        &mut self,
        packet: &[u8],
        request_id: i64,
    ) -> Result<ResponsePdu, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            socket.send(packet).await?;
            match tokio::time::timeout(self.settings.timeout, receive(socket, request_id)).await {
                Ok(outcome) => return outcome,
                Err(_) if attempts <= self.settings.retries => {
                    debug!(target = %self.target, attempts, "snmp request timed out, retrying");
                }
                Err(_) => {
                    return Err(TransportError::Timeout {
                        target: self.target.clone(),
                        attempts,
                    })
                }
            }
        }
    }
}

async fn receive(socket: &UdpSocket, request_id: i64) -> Result<ResponsePdu, TransportError> {
    let mut buf = vec![0u8; 65536];
    loop {
        let n = socket.recv(&mut buf).await?;
        let pdu = decode_response(&buf[..n])?;
        if pdu.request_id == request_id {
            return Ok(pdu);
        }
        // Stale reply from a retried request; keep listening.
    }
}

fn next_request_id() -> i64 {
    // Stay within i32 range, which is what agents echo back.
    REQUEST_IDS.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
}

fn is_under(base: &str, oid: &str) -> bool {
    oid == base || (oid.starts_with(base) && oid.as_bytes().get(base.len()) == Some(&b'.'))
}

#[derive(Debug)]
struct ResponsePdu {
    request_id: i64,
    error_status: i64,
    error_index: i64,
    varbinds: Vec<(String, SnmpValue)>,
}

// --- BER encoding ---

fn push_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    push_len(buf, content.len());
    buf.extend_from_slice(content);
}

fn push_len(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        buf.push(0x80 | (bytes.len() - skip) as u8);
        buf.extend_from_slice(&bytes[skip..]);
    }
}

fn encode_int(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        // Drop redundant leading bytes while preserving the sign bit.
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_oid(oid: &str) -> Result<Vec<u8>, TransportError> {
    let parts: Vec<u64> = oid
        .split('.')
        .map(|part| part.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| TransportError::Malformed(format!("bad oid {oid:?}")))?;
    if parts.len() < 2 || parts[0] > 2 || (parts[0] < 2 && parts[1] > 39) {
        return Err(TransportError::Malformed(format!("bad oid {oid:?}")));
    }
    let mut out = Vec::with_capacity(parts.len() + 1);
    push_subid(&mut out, parts[0] * 40 + parts[1]);
    for part in &parts[2..] {
        push_subid(&mut out, *part);
    }
    Ok(out)
}

fn push_subid(out: &mut Vec<u8>, mut subid: u64) {
    let mut chunk = [0u8; 10];
    let mut i = chunk.len();
    loop {
        i -= 1;
        chunk[i] = (subid & 0x7f) as u8;
        subid >>= 7;
        if subid == 0 {
            break;
        }
    }
    for (pos, byte) in chunk[i..].iter().enumerate() {
        let last = pos == chunk.len() - i - 1;
        out.push(if last { *byte } else { byte | 0x80 });
    }
}

/// Builds a GET or GETBULK message. For GET `field1`/`field2` are
/// error-status and error-index (zero on requests); for GETBULK they are
/// non-repeaters and max-repetitions.
fn encode_message(
    pdu_tag: u8,
    community: &str,
    request_id: i64,
    field1: i64,
    field2: i64,
    oids: &[&str],
) -> Result<Vec<u8>, TransportError> {
    let mut varbinds = Vec::new();
    for oid in oids {
        let mut varbind = Vec::new();
        push_tlv(&mut varbind, TAG_OID, &encode_oid(oid)?);
        push_tlv(&mut varbind, TAG_NULL, &[]);
        push_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);
    }

    let mut pdu = Vec::new();
    push_tlv(&mut pdu, TAG_INTEGER, &encode_int(request_id));
    push_tlv(&mut pdu, TAG_INTEGER, &encode_int(field1));
    push_tlv(&mut pdu, TAG_INTEGER, &encode_int(field2));
    push_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

    let mut message = Vec::new();
    push_tlv(&mut message, TAG_INTEGER, &encode_int(SNMP_VERSION_2C));
    push_tlv(&mut message, TAG_OCTET_STRING, community.as_bytes());
    push_tlv(&mut message, pdu_tag, &pdu);

    let mut packet = Vec::with_capacity(message.len() + 4);
    push_tlv(&mut packet, TAG_SEQUENCE, &message);
    Ok(packet)
}

// --- BER decoding ---

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8, TransportError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| TransportError::Malformed("truncated message".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        if self.remaining() < n {
            return Err(TransportError::Malformed("truncated message".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads one TLV header and returns (tag, content reader).
    fn tlv(&mut self) -> Result<(u8, Reader<'a>), TransportError> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                return Err(TransportError::Malformed("unsupported length".to_string()));
            }
            let mut len = 0usize;
            for byte in self.take(count)? {
                len = (len << 8) | *byte as usize;
            }
            len
        };
        Ok((tag, Reader::new(self.take(len)?)))
    }

    fn int(&mut self) -> Result<i64, TransportError> {
        let (tag, content) = self.tlv()?;
        if tag != TAG_INTEGER {
            return Err(TransportError::Malformed(format!(
                "expected integer, got tag {tag:#04x}"
            )));
        }
        Ok(decode_int(content.data))
    }
}

fn decode_int(bytes: &[u8]) -> i64 {
    let mut value: i64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }
    value
}

fn decode_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn decode_oid(bytes: &[u8]) -> Result<String, TransportError> {
    if bytes.is_empty() {
        return Err(TransportError::Malformed("empty oid".to_string()));
    }
    let mut parts: Vec<u64> = Vec::new();
    let mut subid: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        subid = (subid << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            if parts.is_empty() {
                let first = (subid / 40).min(2);
                parts.push(first);
                parts.push(subid - first * 40);
            } else {
                parts.push(subid);
            }
            subid = 0;
        } else if i == bytes.len() - 1 {
            return Err(TransportError::Malformed("truncated oid".to_string()));
        }
    }
    Ok(parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("."))
}

fn decode_value(tag: u8, content: &[u8]) -> SnmpValue {
    match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_int(content)),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => match decode_oid(content) {
            Ok(oid) => SnmpValue::ObjectIdentifier(oid),
            Err(_) => SnmpValue::Opaque(content.to_vec()),
        },
        TAG_IP_ADDRESS if content.len() == 4 => {
            SnmpValue::IpAddress([content[0], content[1], content[2], content[3]])
        }
        TAG_COUNTER32 | TAG_GAUGE32 | TAG_TIMETICKS | TAG_COUNTER64 => {
            SnmpValue::Unsigned(decode_uint(content))
        }
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        _ => SnmpValue::Opaque(content.to_vec()),
    }
}

fn decode_response(packet: &[u8]) -> Result<ResponsePdu, TransportError> {
    let mut outer = Reader::new(packet);
    let (tag, mut message) = outer.tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(TransportError::Malformed("not an snmp message".to_string()));
    }

    let version = message.int()?;
    if version != SNMP_VERSION_2C {
        return Err(TransportError::Malformed(format!(
            "unsupported snmp version {version}"
        )));
    }
    let (tag, _community) = message.tlv()?;
    if tag != TAG_OCTET_STRING {
        return Err(TransportError::Malformed("missing community".to_string()));
    }

    let (tag, mut pdu) = message.tlv()?;
    if tag != TAG_GET_RESPONSE {
        return Err(TransportError::Malformed(format!(
            "unexpected pdu tag {tag:#04x}"
        )));
    }
    let request_id = pdu.int()?;
    let error_status = pdu.int()?;
    let error_index = pdu.int()?;

    let (tag, mut varbind_list) = pdu.tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(TransportError::Malformed("missing varbind list".to_string()));
    }
    let mut varbinds = Vec::new();
    while varbind_list.remaining() > 0 {
        let (tag, mut varbind) = varbind_list.tlv()?;
        if tag != TAG_SEQUENCE {
            return Err(TransportError::Malformed("bad varbind".to_string()));
        }
        let (tag, name) = varbind.tlv()?;
        if tag != TAG_OID {
            return Err(TransportError::Malformed("varbind missing oid".to_string()));
        }
        let oid = decode_oid(name.data)?;
        let (tag, value) = varbind.tlv()?;
        varbinds.push((oid, decode_value(tag, value.data)));
    }

    Ok(ResponsePdu {
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Request id of an encoded GET/GETBULK packet.
    fn request_id_of(packet: &[u8]) -> i64 {
        let mut outer = Reader::new(packet);
        let (_, mut message) = outer.tlv().unwrap();
        message.int().unwrap();
        message.tlv().unwrap();
        let (_, mut pdu) = message.tlv().unwrap();
        pdu.int().unwrap()
    }

    /// Hand-built response carrying one octet-string varbind.
    fn octet_response(request_id: i64, oid: &str, octets: &[u8]) -> Vec<u8> {
        let mut varbind = Vec::new();
        push_tlv(&mut varbind, TAG_OID, &encode_oid(oid).unwrap());
        push_tlv(&mut varbind, TAG_OCTET_STRING, octets);
        let mut varbinds = Vec::new();
        push_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);

        let mut pdu = Vec::new();
        push_tlv(&mut pdu, TAG_INTEGER, &encode_int(request_id));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_int(0));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_int(0));
        push_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut message = Vec::new();
        push_tlv(&mut message, TAG_INTEGER, &encode_int(SNMP_VERSION_2C));
        push_tlv(&mut message, TAG_OCTET_STRING, b"public");
        push_tlv(&mut message, TAG_GET_RESPONSE, &pdu);
        let mut packet = Vec::new();
        push_tlv(&mut packet, TAG_SEQUENCE, &message);
        packet
    }

    fn session_against(port: u16, timeout: Duration) -> SnmpSession {
        let factory = SnmpSessionFactory::new(SessionSettings {
            port,
            timeout,
            ..SessionSettings::default()
        });
        factory.session("127.0.0.1")
    }

    #[tokio::test]
    async fn test_get_retries_after_silent_first_attempt() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            // Swallow the first request; answer the retry.
            responder.recv_from(&mut buf).await.unwrap();
            let (n, peer) = responder.recv_from(&mut buf).await.unwrap();
            let reply = octet_response(
                request_id_of(&buf[..n]),
                topo_types::oids::LLDP_LOC_CHASSIS_ID,
                &[0xaa, 0xbb, 0xcc],
            );
            responder.send_to(&reply, peer).await.unwrap();
        });

        let mut session = session_against(port, Duration::from_millis(100));
        session.connect().await.unwrap();
        let values = session
            .get(&[topo_types::oids::LLDP_LOC_CHASSIS_ID])
            .await
            .unwrap();
        assert_eq!(values, vec![SnmpValue::OctetString(vec![0xaa, 0xbb, 0xcc])]);
    }

    #[tokio::test]
    async fn test_get_times_out_after_retry_budget() {
        // Bound but never answered, so every attempt runs into the timeout.
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        let mut session = session_against(port, Duration::from_millis(50));
        session.connect().await.unwrap();
        let err = session
            .get(&[topo_types::oids::LLDP_LOC_CHASSIS_ID])
            .await
            .unwrap_err();
        match err {
            TransportError::Timeout { target, attempts } => {
                assert_eq!(target, "127.0.0.1");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        drop(responder);
    }

    #[test]
    fn test_oid_codec_round_trip() {
        for oid in [
            "1.3.6.1.2.1.2.2.1.6",
            "1.0.8802.1.1.2.1.4.1.1.5.0.7.1",
            "2.999.3",
        ] {
            let encoded = encode_oid(oid).unwrap();
            assert_eq!(decode_oid(&encoded).unwrap(), oid);
        }
    }

    #[test]
    fn test_oid_rejects_garbage() {
        assert!(encode_oid("").is_err());
        assert!(encode_oid("1").is_err());
        assert!(encode_oid("1.foo.3").is_err());
        assert!(encode_oid("1.40.3").is_err());
    }

    #[test]
    fn test_int_codec_round_trip() {
        for value in [0i64, 1, 127, 128, 255, 256, -1, -128, -129, 1_000_000, i64::from(i32::MAX)] {
            assert_eq!(decode_int(&encode_int(value)), value, "value {value}");
        }
    }

    #[test]
    fn test_long_form_length() {
        let content = vec![0u8; 300];
        let mut buf = Vec::new();
        push_tlv(&mut buf, TAG_OCTET_STRING, &content);
        assert_eq!(&buf[..4], &[TAG_OCTET_STRING, 0x82, 0x01, 0x2c]);

        let mut reader = Reader::new(&buf);
        let (tag, inner) = reader.tlv().unwrap();
        assert_eq!(tag, TAG_OCTET_STRING);
        assert_eq!(inner.data.len(), 300);
    }

    #[test]
    fn test_decode_get_response() {
        let packet = octet_response(42, "1.0.8802.1.1.2.1.3.2.0", &[0xaa, 0xbb, 0xcc]);
        let decoded = decode_response(&packet).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.error_status, 0);
        assert_eq!(decoded.varbinds.len(), 1);
        assert_eq!(decoded.varbinds[0].0, "1.0.8802.1.1.2.1.3.2.0");
        assert_eq!(
            decoded.varbinds[0].1,
            SnmpValue::OctetString(vec![0xaa, 0xbb, 0xcc])
        );
    }

    #[test]
    fn test_decode_rejects_request_pdus() {
        let packet = encode_message(TAG_GET_REQUEST, "public", 7, 0, 0, &["1.3.6.1"]).unwrap();
        assert!(decode_response(&packet).is_err());
    }

    #[test]
    fn test_exception_values() {
        assert_eq!(decode_value(TAG_NO_SUCH_OBJECT, &[]), SnmpValue::NoSuchObject);
        assert_eq!(
            decode_value(TAG_END_OF_MIB_VIEW, &[]),
            SnmpValue::EndOfMibView
        );
        assert_eq!(
            decode_value(TAG_IP_ADDRESS, &[10, 0, 0, 1]),
            SnmpValue::IpAddress([10, 0, 0, 1])
        );
        assert_eq!(decode_value(TAG_COUNTER64, &[1, 0]), SnmpValue::Unsigned(256));
    }

    #[test]
    fn test_walk_subtree_check() {
        let base = "1.0.8802.1.1.2.1.4.1.1.5";
        assert!(is_under(base, "1.0.8802.1.1.2.1.4.1.1.5.0.7.1"));
        assert!(is_under(base, base));
        assert!(!is_under(base, "1.0.8802.1.1.2.1.4.1.1.50"));
        assert!(!is_under(base, "1.0.8802.1.1.2.1.4.1.1.7.0.7.1"));
    }

    #[test]
    fn test_request_ids_stay_positive() {
        let first = next_request_id();
        let second = next_request_id();
        assert!(first >= 0);
        assert!(second > first);
    }
}
