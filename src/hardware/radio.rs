use std::time::Duration;

use tokio::net::UdpSocket;

use super::sim::SimRadio;
use super::{HardwareError, Transceiver, SELECTOR_MORSE};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const DEVICE: &str = "flowgraph";
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Ground receive frequency for a satellite transmitting at `center`. Range
/// velocity starts negative so this starts high and goes low.
pub fn rx_frequency(center: f64, range_velocity: f64) -> f64 {
    (1.0 - range_velocity / SPEED_OF_LIGHT) * center
}

/// Ground transmit frequency so the satellite hears `center`. Starts low, goes high.
pub fn tx_frequency(center: f64, range_velocity: f64) -> f64 {
    (1.0 + range_velocity / SPEED_OF_LIGHT) * center
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Nil,
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
}

impl RpcValue {
    fn to_xml(&self) -> String {
        match self {
            RpcValue::Nil => "<nil/>".to_string(),
            RpcValue::Bool(b) => format!("<boolean>{}</boolean>", u8::from(*b)),
            RpcValue::Int(i) => format!("<int>{}</int>", i),
            RpcValue::Double(d) => format!("<double>{}</double>", d),
            RpcValue::Str(s) => format!("<string>{}</string>", escape(s)),
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

pub fn encode_call(method: &str, params: &[RpcValue]) -> String {
    let params: String = params
        .iter()
        .map(|p| format!("<param><value>{}</value></param>", p.to_xml()))
        .collect();
    format!(
        "<?xml version=\"1.0\"?>\n<methodCall><methodName>{}</methodName><params>{}</params></methodCall>\n",
        method, params
    )
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

/// Extracts the single return value of an XML-RPC method response.
pub fn parse_response(body: &str) -> Result<RpcValue, HardwareError> {
    let malformed = || HardwareError::Malformed {
        device: DEVICE,
        reply: body.to_string(),
    };

    if body.contains("<fault>") {
        let message = between(body, "<string>", "</string>").unwrap_or("unknown fault");
        return Err(HardwareError::Rpc(unescape(message)));
    }

    let params = between(body, "<params>", "</params>").ok_or_else(malformed)?;
    let Some(value) = between(params, "<value>", "</value>") else {
        return Ok(RpcValue::Nil);
    };
    let value = value.trim();

    if value.is_empty() || value == "<nil/>" {
        return Ok(RpcValue::Nil);
    }
    if let Some(v) = between(value, "<double>", "</double>") {
        return v.trim().parse().map(RpcValue::Double).map_err(|_| malformed());
    }
    if let Some(v) = between(value, "<int>", "</int>").or_else(|| between(value, "<i4>", "</i4>")) {
        return v.trim().parse().map(RpcValue::Int).map_err(|_| malformed());
    }
    if let Some(v) = between(value, "<boolean>", "</boolean>") {
        return Ok(RpcValue::Bool(v.trim() == "1"));
    }
    if let Some(v) = between(value, "<string>", "</string>") {
        return Ok(RpcValue::Str(unescape(v)));
    }
    if value == "<string/>" {
        return Ok(RpcValue::Str(String::new()));
    }
    if value.starts_with('<') {
        return Err(malformed());
    }
    // Untyped values are strings
    Ok(RpcValue::Str(unescape(value)))
}

/// Binding to the SDR flowgraph: XML-RPC for tuning and configuration, a
/// UDP port for EDL uplink packets.
pub struct Flowgraph {
    client: reqwest::Client,
    url: String,
    edl: UdpSocket,
    tx_center: f64,
    rx_center: f64,
    callsign: String,
    morse_delay: Duration,
}

impl Flowgraph {
    pub async fn connect(
        flowgraph: &str,
        edl_dest: &str,
        callsign: &str,
        morse_delay: Duration,
    ) -> Result<Self, HardwareError> {
        let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        let edl = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(HardwareError::io(DEVICE))?;
        edl.connect(edl_dest).await.map_err(HardwareError::io(DEVICE))?;

        let mut radio = Self {
            client,
            url: format!("http://{}", flowgraph),
            edl,
            tx_center: 0.0,
            rx_center: 0.0,
            callsign: callsign.to_string(),
            morse_delay,
        };
        radio.tx_center = radio.get_double("get_tx_center_frequency").await?;
        radio.rx_center = radio.get_double("get_rx_target_frequency").await?;
        log::info!(
            "Flowgraph at {}: TX center {:.1} Hz, RX center {:.1} Hz",
            radio.url,
            radio.tx_center,
            radio.rx_center
        );
        Ok(radio)
    }

    async fn call(&self, method: &str, params: &[RpcValue]) -> Result<RpcValue, HardwareError> {
        log::trace!("{}({:?})", method, params);
        let body = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(encode_call(method, params))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_response(&body)
    }

    async fn get_double(&self, method: &str) -> Result<f64, HardwareError> {
        match self.call(method, &[]).await? {
            RpcValue::Double(v) => Ok(v),
            other => Err(HardwareError::Malformed {
                device: DEVICE,
                reply: format!("{} returned {:?}", method, other),
            }),
        }
    }

    pub async fn get_tx_selector(&self) -> Result<String, HardwareError> {
        match self.call("get_tx_selector", &[]).await? {
            RpcValue::Str(s) => Ok(s),
            other => Err(HardwareError::Malformed {
                device: DEVICE,
                reply: format!("get_tx_selector returned {:?}", other),
            }),
        }
    }

    pub async fn set_morse_ident(&self, ident: &str) -> Result<(), HardwareError> {
        log::info!("Sending morse ident {}", ident);
        self.call("set_morse_ident", &[RpcValue::Str(ident.to_string())])
            .await
            .map(|_| ())
    }
}

impl Transceiver for Flowgraph {
    async fn set_rx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        let freq = rx_frequency(self.rx_center, range_velocity);
        log::info!("Set RX frequency {:.1}", freq);
        self.call("set_gpredict_rx_frequency", &[RpcValue::Double(freq)])
            .await?;
        Ok(freq)
    }

    async fn set_tx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        let freq = tx_frequency(self.tx_center, range_velocity);
        log::info!("Set TX frequency {:.1}", freq);
        self.call("set_gpredict_tx_frequency", &[RpcValue::Double(freq)])
            .await?;
        Ok(freq)
    }

    async fn set_tx_gain(&mut self, gain: i32) -> Result<(), HardwareError> {
        log::info!("Setting gain {}", gain);
        self.call("set_tx_gain", &[RpcValue::Int(gain)]).await.map(|_| ())
    }

    async fn set_tx_selector(&mut self, mode: &str) -> Result<(), HardwareError> {
        log::info!("Selecting mode {}", mode);
        self.call("set_tx_selector", &[RpcValue::Str(mode.to_string())])
            .await
            .map(|_| ())
    }

    async fn ident(&mut self) -> Result<(), HardwareError> {
        let previous = self.get_tx_selector().await?;
        self.set_tx_selector(SELECTOR_MORSE).await?;
        let callsign = self.callsign.clone();
        let sent = async {
            self.set_morse_ident(&callsign).await?;
            tokio::time::sleep(self.morse_delay).await;
            Ok::<(), HardwareError>(())
        }
        .await;
        // Put the previous mode back even if the ident failed
        let restored = self.set_tx_selector(&previous).await;
        sent.and(restored)
    }

    async fn edl(&mut self, packet: &[u8]) -> Result<(), HardwareError> {
        self.edl.send(packet).await.map_err(HardwareError::io(DEVICE))?;
        Ok(())
    }
}

pub enum Radio {
    Flowgraph(Flowgraph),
    Sim(SimRadio),
}

impl Transceiver for Radio {
    async fn set_rx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.set_rx_frequency(range_velocity).await,
            Radio::Sim(r) => r.set_rx_frequency(range_velocity).await,
        }
    }

    async fn set_tx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.set_tx_frequency(range_velocity).await,
            Radio::Sim(r) => r.set_tx_frequency(range_velocity).await,
        }
    }

    async fn set_tx_gain(&mut self, gain: i32) -> Result<(), HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.set_tx_gain(gain).await,
            Radio::Sim(r) => r.set_tx_gain(gain).await,
        }
    }

    async fn set_tx_selector(&mut self, mode: &str) -> Result<(), HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.set_tx_selector(mode).await,
            Radio::Sim(r) => r.set_tx_selector(mode).await,
        }
    }

    async fn ident(&mut self) -> Result<(), HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.ident().await,
            Radio::Sim(r) => r.ident().await,
        }
    }

    async fn edl(&mut self, packet: &[u8]) -> Result<(), HardwareError> {
        match self {
            Radio::Flowgraph(r) => r.edl(packet).await,
            Radio::Sim(r) => r.edl(packet).await,
        }
    }
}
