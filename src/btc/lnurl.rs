//! LNURL link encoding (LUD-01): the URL is bech32-encoded under the `lnurl`
//! human-readable part, without a length limit.

use bech32::{Bech32, Hrp};

use crate::error::{Result, SwapError};

const HRP: &str = "lnurl";

pub fn encode(url: &str) -> Result<String> {
    let hrp = Hrp::parse(HRP).expect("static hrp is valid");
    bech32::encode::<Bech32>(hrp, url.as_bytes())
        .map_err(|e| SwapError::Bitcoin(format!("encode lnurl: {e}")))
}

pub fn decode(lnurl: &str) -> Result<String> {
    let (hrp, data) =
        bech32::decode(lnurl.trim()).map_err(|e| SwapError::Bitcoin(format!("decode lnurl: {e}")))?;
    if hrp.to_string().to_lowercase() != HRP {
        return Err(SwapError::Bitcoin(format!(
            "unexpected lnurl prefix: {hrp}"
        )));
    }
    String::from_utf8(data).map_err(|e| SwapError::Bitcoin(format!("lnurl payload not utf8: {e}")))
}

pub fn is_valid(lnurl: &str) -> bool {
    decode(lnurl).is_ok()
}
