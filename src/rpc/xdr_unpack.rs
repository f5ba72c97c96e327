
use crate::error::{rpc, Result};
use crate::xdr::Unpacker;
use crate::rpc::{REPLY, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

pub struct Auth {
	pub flavor: i32,
	pub body: Vec<u8>,
}

pub fn unpack_auth(unpacker:&mut Unpacker) -> Result<Auth> {
	let flavor:i32  = unpacker.unpack_enum()?;
	let body:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok(Auth{ flavor, body })
}

/// Decodes an accepted, successful reply header and returns its xid.  The
/// unpacker is left positioned at the procedure results.
pub fn unpack_replyheader(unpacker:&mut Unpacker) -> Result<(u32, Auth)> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != REPLY { return Err(rpc(format!("Expected REPLY message type but got {}", mtype))); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			return match unpacker.unpack_enum()? {
				RPC_MISMATCH => {
					let low  = unpacker.unpack_u32()?;
					let high = unpacker.unpack_u32()?;
					Err(rpc(format!("Message denied due to RPC_MISMATCH (server supports {}..={})", low, high)))
				},
				AUTH_ERROR => {
					let stat = unpacker.unpack_u32()?;
					Err(rpc(format!("Message denied due to AUTH_ERROR (status {})", stat)))
				},
				_ => Err(rpc("Message denied for an unknown reason")),
			}
		},
		MSG_ACCEPTED => { },
		x => return Err(rpc(format!("Neither MSG_DENIED nor MSG_ACCEPTED in reply, got {}", x))),
	}

	let verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS       => Ok((xid, verf)),
		PROG_UNAVAIL  => Err(rpc("Program unavailable")),
		PROG_MISMATCH => {
			let low  = unpacker.unpack_u32()?;
			let high = unpacker.unpack_u32()?;
			Err(rpc(format!("Program mismatch (server supports {}..={})", low, high)))
		},
		PROC_UNAVAIL  => Err(rpc("Procedure unavailable")),
		GARBAGE_ARGS  => Err(rpc("Garbage args")),
		x => Err(rpc(format!("Call failed with accept status {}", x))),
	}
}
