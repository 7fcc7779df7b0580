use tracing::error;
use wptsync::error::RpcError;
use wptsync::Error;

/// Log a failed run. RPC failures also print the request payload so the
/// call can be reproduced by hand.
pub fn report(err: &anyhow::Error) {
  error!("{err:#}");
  let rpc = err.chain().find_map(|cause| match cause.downcast_ref::<Error>() {
    Some(Error::Rpc(rpc)) => Some(rpc),
    _ => cause.downcast_ref::<RpcError>(),
  });
  if let Some(rpc) = rpc {
    error!("Request payload:");
    error!("{}", rpc.payload_pretty());
  }
}

/// Exit code for a finished run.
pub fn exit_code(result: &anyhow::Result<()>) -> i32 {
  match result {
    Ok(()) => 0,
    Err(err) => {
      report(err);
      1
    }
  }
}
