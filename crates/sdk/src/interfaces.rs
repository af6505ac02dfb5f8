//! Source engine interface type definitions
//!
//! These are opaque types representing C++ engine objects.
//! We don't need their internal structure - just pointers.
//! Virtual methods are reached through raw vtable pointer arithmetic.

use std::ffi::c_void;

use crate::bitbuf::BfWrite;
use crate::usercmd::UserCmd;

/// Opaque type for IVEngineServer
/// Engine interface that owns the user message entry points
#[repr(C)]
pub struct IVEngineServer {
    _opaque: [u8; 0],
}

/// Opaque type for IRecipientFilter
/// List of clients a user message is sent to
#[repr(C)]
pub struct IRecipientFilter {
    _opaque: [u8; 0],
}

/// Opaque type for a protobuf user message (`google::protobuf::Message`)
#[repr(C)]
pub struct ProtobufMessage {
    _opaque: [u8; 0],
}

/// Opaque type for IMoveHelper
/// Passed through untouched to PlayerRunCommand
#[repr(C)]
pub struct IMoveHelper {
    _opaque: [u8; 0],
}

/// Opaque type for CBasePlayer
/// Server-side player entity, the `this` of PlayerRunCommand
#[repr(C)]
pub struct CBasePlayer {
    _opaque: [u8; 0],
}

/// `void CBasePlayer::PlayerRunCommand(CUserCmd*, IMoveHelper*)`
pub type PlayerRunCommandFn =
    unsafe extern "C" fn(this: *mut CBasePlayer, cmd: *mut UserCmd, move_helper: *mut IMoveHelper);

/// `bf_write* IVEngineServer::UserMessageBegin(IRecipientFilter*, int)`
pub type UserMessageBeginFn = unsafe extern "C" fn(
    this: *mut IVEngineServer,
    filter: *mut IRecipientFilter,
    message_id: i32,
) -> *mut BfWrite;

/// `void IVEngineServer::MessageEnd()`
pub type MessageEndFn = unsafe extern "C" fn(this: *mut IVEngineServer);

/// `void IVEngineServer::SendUserMessage(IRecipientFilter&, int, const Message&)`
pub type SendUserMessageFn = unsafe extern "C" fn(
    this: *mut IVEngineServer,
    filter: *mut IRecipientFilter,
    message_id: i32,
    message: *const ProtobufMessage,
);

/// Read the vtable pointer stored in the first word of a C++ object
///
/// # Safety
/// `object` must point to a live polymorphic C++ object.
#[inline]
pub unsafe fn vtable_of(object: *const c_void) -> *mut *const () {
    *(object as *const *mut *const ())
}
