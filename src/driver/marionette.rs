//! Firefox Marionette client.
//!
//! Marionette frames every message as `length:json` over a plain TCP
//! socket. Requests are four-element arrays `[0, msgid, command, params]`,
//! responses `[1, msgid, error, result]`. The pilot loop is strictly
//! sequential, so a single mutex-guarded stream with msgid correlation is
//! all the transport needs.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{BrowserDriver, DriverError, ElementRef};

/// W3C WebDriver element identifier key.
const WEB_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver keycode for the Return key, used to submit forms.
pub const KEY_RETURN: &str = "\u{e006}";

struct Transport {
    stream: TcpStream,
    next_id: u64,
}

impl Transport {
    async fn send(&mut self, payload: &Value) -> Result<(), DriverError> {
        let body = serde_json::to_string(payload)
            .map_err(|err| DriverError::Protocol(format!("encode failed: {err}")))?;
        let frame = format!("{}:{}", body.len(), body);
        self.stream.write_all(frame.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Value, DriverError> {
        // Length prefix: ASCII digits terminated by ':'.
        let mut len: usize = 0;
        loop {
            let byte = self.stream.read_u8().await?;
            match byte {
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|n| n.checked_add((byte - b'0') as usize))
                        .ok_or_else(|| {
                            DriverError::Protocol("frame length overflow".to_string())
                        })?;
                }
                b':' => break,
                other => {
                    return Err(DriverError::Protocol(format!(
                        "unexpected byte {other:#04x} in frame length"
                    )))
                }
            }
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        serde_json::from_slice(&body)
            .map_err(|err| DriverError::Protocol(format!("malformed frame: {err}")))
    }
}

pub struct MarionetteDriver {
    transport: Mutex<Transport>,
}

impl MarionetteDriver {
    /// Connect, consume the handshake, and start a WebDriver session.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let addr = format!("{host}:{port}");
        debug!(%addr, "connecting to marionette");

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DriverError::Connect(format!("connection to {addr} timed out")))?
            .map_err(|err| {
                DriverError::Connect(format!(
                    "connection to {addr} refused ({err}); is Firefox running with Marionette enabled?"
                ))
            })?;

        let mut transport = Transport { stream, next_id: 0 };

        let handshake = timeout(connect_timeout, transport.read_frame())
            .await
            .map_err(|_| DriverError::Connect("handshake timed out".to_string()))??;
        let protocol = handshake
            .get("marionetteProtocol")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if protocol != 3 {
            return Err(DriverError::Connect(format!(
                "unsupported marionette protocol {protocol}"
            )));
        }

        let driver = Self {
            transport: Mutex::new(transport),
        };
        driver.command("WebDriver:NewSession", json!({})).await?;
        debug!("marionette session started");
        Ok(driver)
    }

    /// Issue one command and wait for its correlated response.
    async fn command(&self, name: &str, params: Value) -> Result<Value, DriverError> {
        let mut transport = self.transport.lock().await;
        transport.next_id += 1;
        let msgid = transport.next_id;
        transport.send(&json!([0, msgid, name, params])).await?;

        loop {
            let frame = transport.read_frame().await?;
            let parts = frame
                .as_array()
                .ok_or_else(|| DriverError::Protocol("response is not an array".to_string()))?;
            if parts.first().and_then(Value::as_u64) != Some(1) {
                // Unsolicited message; Marionette emits none we care about.
                continue;
            }
            if parts.get(1).and_then(Value::as_u64) != Some(msgid) {
                warn!(command = name, "discarding stale response frame");
                continue;
            }

            let error = parts.get(2).cloned().unwrap_or(Value::Null);
            if !error.is_null() {
                let code = error
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if code == "no such element" {
                    return Err(DriverError::NoSuchElement(message));
                }
                return Err(DriverError::Command {
                    command: name.to_string(),
                    message: format!("{code}: {message}"),
                });
            }

            return Ok(parts.get(3).cloned().unwrap_or(Value::Null));
        }
    }

    fn element_from_value(value: &Value) -> Option<ElementRef> {
        value
            .get(WEB_ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string()))
    }

    fn unwrap_value(result: Value) -> Value {
        match result {
            Value::Object(mut map) if map.contains_key("value") => {
                map.remove("value").unwrap_or(Value::Null)
            }
            other => other,
        }
    }
}

#[async_trait]
impl BrowserDriver for MarionetteDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.command("WebDriver:Navigate", json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn find_element(&self, selector: &str) -> Result<Option<ElementRef>, DriverError> {
        let result = self
            .command(
                "WebDriver:FindElement",
                json!({ "using": "css selector", "value": selector }),
            )
            .await;
        match result {
            Ok(value) => Ok(Self::element_from_value(&Self::unwrap_value(value))),
            Err(DriverError::NoSuchElement(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementRef>, DriverError> {
        let value = self
            .command(
                "WebDriver:FindElements",
                json!({ "using": "css selector", "value": selector }),
            )
            .await?;
        let unwrapped = Self::unwrap_value(value);
        let Some(items) = unwrapped.as_array() else {
            return Ok(Vec::new());
        };
        Ok(items.iter().filter_map(Self::element_from_value).collect())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.command("WebDriver:ElementClick", json!({ "id": element.0 }))
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.command("WebDriver:ElementClear", json!({ "id": element.0 }))
            .await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.command(
            "WebDriver:ElementSendKeys",
            json!({ "id": element.0, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let value = self
            .command("WebDriver:GetElementText", json!({ "id": element.0 }))
            .await?;
        Ok(Self::unwrap_value(value)
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn element_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let value = self
            .command(
                "WebDriver:GetElementAttribute",
                json!({ "id": element.0, "name": name }),
            )
            .await?;
        Ok(Self::unwrap_value(value).as_str().map(|s| s.to_string()))
    }

    async fn execute_script(&self, source: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let value = self
            .command(
                "WebDriver:ExecuteScript",
                json!({ "script": source, "args": args }),
            )
            .await?;
        Ok(Self::unwrap_value(value))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let value = self
            .command("WebDriver:TakeScreenshot", json!({}))
            .await?;
        let encoded = Self::unwrap_value(value);
        let encoded = encoded
            .as_str()
            .ok_or_else(|| DriverError::Protocol("screenshot payload is not base64".to_string()))?;
        Base64
            .decode(encoded)
            .map_err(|err| DriverError::Protocol(format!("screenshot decode failed: {err}")))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let value = self.command("WebDriver:GetCurrentUrl", json!({})).await?;
        Ok(Self::unwrap_value(value)
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.command("WebDriver:DeleteSession", json!({})).await?;
        Ok(())
    }

    fn script_arg(&self, element: &ElementRef) -> Value {
        json!({ WEB_ELEMENT_KEY: element.0 })
    }
}
