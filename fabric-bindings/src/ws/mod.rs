//! Web-service binding, target side.
//!
//! Envelope serialization is left to the [`SoapTransport`]; the interceptor deals with the
//! parts the runtime owns: retries and call frame propagation.
use fabric_core::context::{codec, WorkContext};

pub use self::target::{
    SoapError, SoapRequest, SoapTransport, WsTargetConfig, WsTargetError, WsTargetInterceptor,
};

mod target;

/// Transport header carrying the caller's call frames, string encoded.
pub const CALLFRAMES_HEADER: &str = "callframes";

/// Pushes the frames of an inbound [`CALLFRAMES_HEADER`] value onto `ctx`, bottom first.
pub fn restore_call_frames(
    ctx: &mut WorkContext,
    header: &str,
) -> Result<(), codec::FrameCodecError> {
    let frames = codec::deserialize_string(header)?;
    ctx.add_call_frames(frames);
    Ok(())
}
