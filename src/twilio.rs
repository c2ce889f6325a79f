//! Carrier REST integration: building the `/voice` TwiML response and
//! placing the outbound "call_mom" trigger call.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Build the carrier XML instruction document telling it to open a
/// bidirectional media stream back to our `/stream` websocket.
pub fn voice_twiml(public_base_url: &str) -> String {
    let host = public_base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Connect>\n    <Stream url=\"wss://{host}/stream\" />\n  </Connect>\n</Response>"
    )
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    sid: String,
    status: String,
}

/// Place an outbound call via the carrier's Calls API, pointing it at our
/// `/voice` webhook for instructions.
pub async fn create_outbound_call(cfg: &Config) -> Result<(String, String)> {
    let account_sid = cfg.twilio_account_sid.trim();
    let auth_token = cfg.twilio_auth_token.trim();
    let from_number = cfg.twilio_from_number.trim();
    let to_number = cfg.mom_phone_number.trim();

    if account_sid.is_empty() || auth_token.is_empty() {
        bail!("missing TWILIO_ACCOUNT_SID or TWILIO_AUTH_TOKEN");
    }
    if from_number.is_empty() {
        bail!("missing TWILIO_FROM_NUMBER");
    }
    if to_number.is_empty() {
        bail!("missing MOM_PHONE_NUMBER");
    }
    if cfg.public_base_url.is_empty() {
        bail!("missing PUBLIC_BASE_URL");
    }

    let voice_url = format!("{}/voice", cfg.public_base_url.trim_end_matches('/'));
    let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Calls.json");

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .basic_auth(account_sid, Some(auth_token))
        .form(&[("To", to_number), ("From", from_number), ("Url", voice_url.as_str()), ("Method", "POST")])
        .timeout(std::time::Duration::from_secs(15))
        .send()
        .await
        .context("outbound call request failed")?;

    if !resp.status().is_success() {
        bail!("carrier call API returned {}", resp.status());
    }

    let body: CallResponse = resp.json().await.context("decoding carrier call response")?;
    Ok((body.sid, body.status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_twiml_strips_scheme_and_embeds_stream_url() {
        let xml = voice_twiml("https://example.com");
        assert!(xml.contains("wss://example.com/stream"));
        assert!(xml.contains("<Connect>"));
    }
}
