//! User message hooks
//!
//! Lets listeners suppress user messages before they reach clients.
//!
//! On the legacy path the engine hands out a bit buffer from
//! `UserMessageBegin`, the game writes into it, and `MessageEnd` sends it.
//! To suppress a message we give the game a scratch buffer of our own and
//! swallow the matching `MessageEnd`. On the protobuf path the whole message
//! arrives in one `SendUserMessage` call and is simply not forwarded.
//!
//! Every listener is asked about every message; the message is suppressed
//! if any of them wants it.

use std::ffi::{c_void, CStr};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ncz_sdk::{
    BfWrite, IRecipientFilter, IVEngineServer, MessageEndFn, ProtobufMessage, SendUserMessageFn,
    SlotStatus, UserMessageBeginFn,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::vtable::{HookError, VTableHookKey, VTableHookManager};
use crate::gamedata::Gamedata;
use crate::listeners::{ListenerKey, PriorityListenerRegistry};

/// Gamedata names of the hooked entries
pub const USER_MESSAGE_BEGIN: &str = "usermessagebegin";
pub const MESSAGE_END: &str = "messageend";
pub const SEND_USER_MESSAGE: &str = "sendusermessage";

/// Size of the scratch buffer, in 32-bit words
pub const SCRATCH_WORDS: usize = 128;

const SCRATCH_NAME: &CStr = c"Intercepted Buffer";

/// Which user message API the game uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// `UserMessageBegin` + `MessageEnd` with a bit buffer
    #[default]
    Legacy,
    /// `SendUserMessage` with a protobuf message
    Protobuf,
}

/// Something that may want to suppress user messages
///
/// Return `true` to suppress the message. Both methods default to letting
/// everything through.
#[allow(unused_variables)]
pub trait UserMessageListener: Send + Sync {
    fn user_message_begin(&self, filter: *mut IRecipientFilter, message_id: i32) -> bool {
        false
    }

    fn send_user_message(
        &self,
        filter: *mut IRecipientFilter,
        message_id: i32,
        message: *const ProtobufMessage,
    ) -> bool {
        false
    }
}

/// Bit buffer handed to the game for a suppressed message
struct ScratchBuffer {
    // Never read on our side, the game writes into it through `header.data`
    _words: Box<[u32; SCRATCH_WORDS]>,
    header: Box<BfWrite>,
}

// SAFETY: the raw pointers in `header` point into `_words` and a static string
unsafe impl Send for ScratchBuffer {}

impl ScratchBuffer {
    fn new() -> Self {
        let mut words = Box::new([0u32; SCRATCH_WORDS]);
        let bytes = (SCRATCH_WORDS * std::mem::size_of::<u32>()) as i32;
        let header = Box::new(BfWrite {
            data: words.as_mut_ptr(),
            data_bytes: bytes,
            data_bits: bytes * 8,
            cur_bit: 0,
            overflow: false,
            assert_on_overflow: true,
            debug_name: SCRATCH_NAME.as_ptr(),
        });

        Self {
            _words: words,
            header,
        }
    }

    fn as_ptr(&mut self) -> *mut BfWrite {
        &mut *self.header
    }
}

#[derive(Clone, Copy)]
struct Originals {
    begin: Option<UserMessageBeginFn>,
    send: Option<SendUserMessageFn>,
    end: MessageEndFn,
}

struct Installed {
    mode: MessageMode,
    keys: Vec<VTableHookKey>,
    originals: Originals,
}

/// Hook currently reachable from the detours
static ACTIVE: RwLock<Option<Arc<UserMessageHook>>> = RwLock::new(None);

/// Interception of engine user messages
pub struct UserMessageHook {
    listeners: PriorityListenerRegistry<dyn UserMessageListener>,
    /// Set between an intercepted begin and its end
    bypass: AtomicBool,
    scratch: Mutex<Option<ScratchBuffer>>,
    installed: RwLock<Option<Installed>>,
}

impl Default for UserMessageHook {
    fn default() -> Self {
        Self::new()
    }
}

impl UserMessageHook {
    pub fn new() -> Self {
        Self {
            listeners: PriorityListenerRegistry::new(),
            bypass: AtomicBool::new(false),
            scratch: Mutex::new(None),
            installed: RwLock::new(None),
        }
    }

    pub fn register_listener(&self, listener: &Arc<dyn UserMessageListener>, priority: usize) -> ListenerKey {
        self.listeners.add(listener, priority, SlotStatus::Invalid)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn UserMessageListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listeners(&self) -> &PriorityListenerRegistry<dyn UserMessageListener> {
        &self.listeners
    }

    /// Whether a legacy message is currently being suppressed
    pub fn is_bypassing(&self) -> bool {
        self.bypass.load(Ordering::Acquire)
    }

    /// Installed mode, if any
    pub fn mode(&self) -> Option<MessageMode> {
        self.installed.read().as_ref().map(|installed| installed.mode)
    }

    /// Hook the user message entries of `engine_server`
    ///
    /// Every index is resolved before anything is written, and a failed
    /// install leaves no entry hooked.
    ///
    /// # Safety
    /// `engine_server` must point to the live `IVEngineServer`.
    pub unsafe fn install(
        self: &Arc<Self>,
        manager: &VTableHookManager,
        gamedata: &Gamedata,
        engine_server: *mut IVEngineServer,
        mode: MessageMode,
    ) -> Result<(), HookError> {
        let mut installed = self.installed.write();
        if installed.is_some() {
            return Err(HookError::InvalidTarget("user message hooks already installed"));
        }

        let entry = match mode {
            MessageMode::Legacy => (
                "IVEngineServer::UserMessageBegin",
                gamedata.vfunc_index(USER_MESSAGE_BEGIN)?,
                user_message_begin_detour as *const (),
            ),
            MessageMode::Protobuf => (
                "IVEngineServer::SendUserMessage",
                gamedata.vfunc_index(SEND_USER_MESSAGE)?,
                send_user_message_detour as *const (),
            ),
        };
        let end_index = gamedata.vfunc_index(MESSAGE_END)?;

        let instance = engine_server as *mut c_void;
        let (entry_key, entry_original) = manager.install(entry.0, instance, entry.1, entry.2)?;
        let (end_key, end_original) = match manager.install(
            "IVEngineServer::MessageEnd",
            instance,
            end_index,
            message_end_detour as *const (),
        ) {
            Ok(hook) => hook,
            Err(e) => {
                if let Err(undo) = manager.uninstall(entry_key) {
                    tracing::error!("Failed to roll back {}: {}", entry.0, undo);
                }
                return Err(e);
            }
        };

        let originals = Originals {
            begin: (mode == MessageMode::Legacy)
                .then(|| std::mem::transmute::<*const (), UserMessageBeginFn>(entry_original)),
            send: (mode == MessageMode::Protobuf)
                .then(|| std::mem::transmute::<*const (), SendUserMessageFn>(entry_original)),
            end: std::mem::transmute::<*const (), MessageEndFn>(end_original),
        };

        *installed = Some(Installed {
            mode,
            keys: vec![entry_key, end_key],
            originals,
        });
        *ACTIVE.write() = Some(Arc::clone(self));

        tracing::info!("Hooked user messages ({:?})", mode);
        tracing::debug!("IVEngineServer at {:x}", engine_server as usize);

        Ok(())
    }

    /// Restore the hooked entries
    pub fn uninstall(&self, manager: &VTableHookManager) {
        let Some(installed) = self.installed.write().take() else {
            return;
        };

        for key in installed.keys {
            if let Err(e) = manager.uninstall(key) {
                tracing::warn!("Failed to unhook user message entry: {}", e);
            }
        }

        self.bypass.store(false, Ordering::Release);
        self.scratch.lock().take();

        let mut active = ACTIVE.write();
        if active.as_ref().is_some_and(|hook| std::ptr::eq(Arc::as_ptr(hook), self)) {
            *active = None;
        }

        tracing::info!("Unhooked user messages ({:?})", installed.mode);
    }

    fn originals(&self) -> Option<Originals> {
        self.installed.read().as_ref().map(|installed| installed.originals)
    }

    /// Ask every listener, `true` if any wants the message suppressed
    fn query(&self, mut ask: impl FnMut(&dyn UserMessageListener) -> bool) -> bool {
        let mut suppress = false;

        for (_, listener) in self.listeners.snapshot() {
            let answer = std::panic::catch_unwind(AssertUnwindSafe(|| ask(&*listener)))
                .unwrap_or_else(|_| {
                    tracing::error!("User message listener panicked");
                    false
                });
            suppress |= answer;
        }

        suppress
    }

    /// A legacy message is starting
    ///
    /// # Returns
    /// The scratch buffer to hand to the game if the message is suppressed,
    /// `None` to forward to the engine.
    pub fn begin(&self, filter: *mut IRecipientFilter, message_id: i32) -> Option<*mut BfWrite> {
        self.clear_stale("UserMessageBegin", message_id);

        if !self.query(|listener| listener.user_message_begin(filter, message_id)) {
            return None;
        }

        self.bypass.store(true, Ordering::Release);
        let mut scratch = self.scratch.lock();
        Some(scratch.insert(ScratchBuffer::new()).as_ptr())
    }

    /// A legacy message is ending
    ///
    /// # Returns
    /// `true` if the message was suppressed and must not be forwarded.
    pub fn end(&self) -> bool {
        if !self.bypass.swap(false, Ordering::AcqRel) {
            return false;
        }

        self.scratch.lock().take();
        true
    }

    /// A protobuf message is being sent
    ///
    /// # Returns
    /// `true` if the message must be dropped.
    pub fn send(&self, filter: *mut IRecipientFilter, message_id: i32, message: *const ProtobufMessage) -> bool {
        self.clear_stale("SendUserMessage", message_id);

        self.query(|listener| listener.send_user_message(filter, message_id, message))
    }

    /// The suppression flag must be down when a message starts. A legacy
    /// message whose MessageEnd never arrived leaves it up.
    fn clear_stale(&self, entry: &str, message_id: i32) {
        let stale = self.bypass.swap(false, Ordering::AcqRel);
        debug_assert!(!stale, "{} for message {} while a message is still suppressed", entry, message_id);
        if stale {
            tracing::warn!("{} without MessageEnd for a suppressed message, resetting", entry);
            self.scratch.lock().take();
        }
    }
}

fn active() -> Option<Arc<UserMessageHook>> {
    ACTIVE.read().clone()
}

extern "C" fn user_message_begin_detour(
    this: *mut IVEngineServer,
    filter: *mut IRecipientFilter,
    message_id: i32,
) -> *mut BfWrite {
    let Some(hook) = active() else {
        tracing::error!("UserMessageBegin called with no active hook!");
        return std::ptr::null_mut();
    };

    if let Some(scratch) = hook.begin(filter, message_id) {
        return scratch;
    }

    match hook.originals().and_then(|originals| originals.begin) {
        Some(original) => unsafe { original(this, filter, message_id) },
        None => {
            tracing::error!("UserMessageBegin original is missing");
            std::ptr::null_mut()
        }
    }
}

extern "C" fn message_end_detour(this: *mut IVEngineServer) {
    let Some(hook) = active() else {
        tracing::error!("MessageEnd called with no active hook!");
        return;
    };

    if hook.end() {
        return;
    }

    match hook.originals() {
        Some(originals) => unsafe { (originals.end)(this) },
        None => tracing::error!("MessageEnd original is missing"),
    }
}

extern "C" fn send_user_message_detour(
    this: *mut IVEngineServer,
    filter: *mut IRecipientFilter,
    message_id: i32,
    message: *const ProtobufMessage,
) {
    let Some(hook) = active() else {
        tracing::error!("SendUserMessage called with no active hook!");
        return;
    };

    if hook.send(filter, message_id, message) {
        return;
    }

    match hook.originals().and_then(|originals| originals.send) {
        Some(original) => unsafe { original(this, filter, message_id, message) },
        None => tracing::error!("SendUserMessage original is missing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    /// Suppresses a single message id and counts the questions
    struct Muter {
        message_id: i32,
        asked: AtomicUsize,
    }

    impl Muter {
        fn new(message_id: i32) -> Arc<Self> {
            Arc::new(Self {
                message_id,
                asked: AtomicUsize::new(0),
            })
        }

        fn asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }
    }

    impl UserMessageListener for Muter {
        fn user_message_begin(&self, _filter: *mut IRecipientFilter, message_id: i32) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            message_id == self.message_id
        }

        fn send_user_message(
            &self,
            _filter: *mut IRecipientFilter,
            message_id: i32,
            _message: *const ProtobufMessage,
        ) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            message_id == self.message_id
        }
    }

    /// Keeps every default
    struct Silent;

    impl UserMessageListener for Silent {}

    fn register(hook: &UserMessageHook, listener: Arc<dyn UserMessageListener>, priority: usize) -> Arc<dyn UserMessageListener> {
        hook.register_listener(&listener, priority);
        listener
    }

    #[test]
    fn test_no_listeners_forwards() {
        let hook = UserMessageHook::new();
        assert!(hook.begin(std::ptr::null_mut(), 5).is_none());
        assert!(!hook.is_bypassing());
        assert!(!hook.end());
        assert!(!hook.send(std::ptr::null_mut(), 5, std::ptr::null()));
    }

    #[test]
    fn test_suppressed_message_gets_scratch_buffer() {
        let hook = UserMessageHook::new();
        let _muter = register(&hook, Muter::new(7), 0);

        let buffer = hook.begin(std::ptr::null_mut(), 7).unwrap();
        assert!(hook.is_bypassing());

        let header = unsafe { &*buffer };
        assert!(!header.data.is_null());
        assert_eq!(header.data_bytes, 512);
        assert_eq!(header.data_bits, 4096);
        assert_eq!(header.cur_bit, 0);
        let name = unsafe { CStr::from_ptr(header.debug_name) };
        assert_eq!(name.to_str().unwrap(), "Intercepted Buffer");

        // The game may write the whole buffer
        unsafe { *header.data.add(SCRATCH_WORDS - 1) = 0xdead_beef };

        assert!(hook.end());
        assert!(!hook.is_bypassing());
        assert!(hook.scratch.lock().is_none());

        // The next end belongs to a forwarded message
        assert!(!hook.end());
    }

    #[test]
    fn test_every_listener_is_asked() {
        let hook = UserMessageHook::new();
        let first = Muter::new(3);
        let second = Muter::new(4);
        let _a = register(&hook, first.clone(), 0);
        let _b = register(&hook, second.clone(), 1);
        let _c = register(&hook, Arc::new(Silent), 2);

        assert!(hook.begin(std::ptr::null_mut(), 3).is_some());
        assert!(hook.end());
        assert_eq!(first.asked(), 1);
        assert_eq!(second.asked(), 1);

        assert!(hook.begin(std::ptr::null_mut(), 4).is_some());
        assert!(hook.end());
        assert!(hook.begin(std::ptr::null_mut(), 9).is_none());
        assert_eq!(first.asked(), 3);
        assert_eq!(second.asked(), 3);
    }

    #[test]
    fn test_protobuf_drop_resets_flag() {
        let hook = UserMessageHook::new();
        let muter = Muter::new(11);
        let _muter = register(&hook, muter.clone(), 0);

        assert!(hook.send(std::ptr::null_mut(), 11, std::ptr::null()));
        assert!(!hook.is_bypassing());
        assert!(!hook.send(std::ptr::null_mut(), 12, std::ptr::null()));
        assert_eq!(muter.asked(), 2);

        // MessageEnd after a dropped protobuf message is forwarded
        assert!(!hook.end());
    }

    #[test]
    fn test_removed_listener_is_not_asked() {
        let hook = UserMessageHook::new();
        let muter = Muter::new(1);
        let listener = register(&hook, muter.clone(), 0);

        assert!(hook.remove_listener(&listener));
        assert!(!hook.remove_listener(&listener));
        assert!(hook.begin(std::ptr::null_mut(), 1).is_none());
        assert_eq!(muter.asked(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "still suppressed")]
    fn test_nested_begin_asserts() {
        let hook = UserMessageHook::new();
        let _muter = register(&hook, Muter::new(1), 0);

        hook.begin(std::ptr::null_mut(), 1);
        hook.begin(std::ptr::null_mut(), 1);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_nested_begin_recovers() {
        let hook = UserMessageHook::new();
        let _muter = register(&hook, Muter::new(1), 0);

        hook.begin(std::ptr::null_mut(), 1);
        assert!(hook.begin(std::ptr::null_mut(), 2).is_none());
        assert!(!hook.is_bypassing());
        assert!(hook.scratch.lock().is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "still suppressed")]
    fn test_send_during_suppressed_legacy_message_asserts() {
        let hook = UserMessageHook::new();
        let _muter = register(&hook, Muter::new(1), 0);

        hook.begin(std::ptr::null_mut(), 1);
        hook.send(std::ptr::null_mut(), 2, std::ptr::null());
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_send_during_suppressed_legacy_message_recovers() {
        let hook = UserMessageHook::new();
        let _muter = register(&hook, Muter::new(1), 0);

        hook.begin(std::ptr::null_mut(), 1);
        assert!(!hook.send(std::ptr::null_mut(), 2, std::ptr::null()));
        assert!(!hook.is_bypassing());
        assert!(hook.scratch.lock().is_none());

        // The next legacy message starts clean
        assert!(hook.begin(std::ptr::null_mut(), 3).is_none());
        assert!(!hook.end());
    }

    static BEGIN_CALLS: AtomicUsize = AtomicUsize::new(0);
    static END_CALLS: AtomicUsize = AtomicUsize::new(0);
    static SEND_CALLS: AtomicUsize = AtomicUsize::new(0);

    const ENGINE_BUFFER: usize = 0x4000;

    unsafe extern "C" fn fake_begin(
        _this: *mut IVEngineServer,
        _filter: *mut IRecipientFilter,
        _message_id: i32,
    ) -> *mut BfWrite {
        BEGIN_CALLS.fetch_add(1, Ordering::SeqCst);
        ENGINE_BUFFER as *mut BfWrite
    }

    unsafe extern "C" fn fake_end(_this: *mut IVEngineServer) {
        END_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn fake_send(
        _this: *mut IVEngineServer,
        _filter: *mut IRecipientFilter,
        _message_id: i32,
        _message: *const ProtobufMessage,
    ) {
        SEND_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[repr(C)]
    struct FakeEngine {
        vtable: *mut *const (),
    }

    fn calls() -> (usize, usize, usize) {
        (
            BEGIN_CALLS.load(Ordering::SeqCst),
            END_CALLS.load(Ordering::SeqCst),
            SEND_CALLS.load(Ordering::SeqCst),
        )
    }

    #[test]
    fn test_detours_end_to_end() {
        let gamedata = Gamedata::default()
            .with_offset(USER_MESSAGE_BEGIN, 0)
            .with_offset(MESSAGE_END, 1)
            .with_offset(SEND_USER_MESSAGE, 2);
        let hook = Arc::new(UserMessageHook::new());
        let _muter = register(&hook, Muter::new(7), 0);

        let mut table = Box::new([fake_begin as *const (), fake_end as *const (), fake_send as *const ()]);
        let mut engine = FakeEngine {
            vtable: table.as_mut_ptr(),
        };
        let this = &mut engine as *mut FakeEngine as *mut IVEngineServer;
        let manager = VTableHookManager::new();

        let begin = |id: i32| unsafe {
            let f: UserMessageBeginFn = std::mem::transmute(table[0]);
            f(this, std::ptr::null_mut(), id)
        };
        let end = || unsafe {
            let f: MessageEndFn = std::mem::transmute(table[1]);
            f(this)
        };
        let send = |id: i32| unsafe {
            let f: SendUserMessageFn = std::mem::transmute(table[2]);
            f(this, std::ptr::null_mut(), id, std::ptr::null())
        };

        // Legacy
        unsafe { hook.install(&manager, &gamedata, this, MessageMode::Legacy).unwrap() };
        assert_eq!(hook.mode(), Some(MessageMode::Legacy));
        assert_eq!(manager.len(), 2);
        assert_eq!(table[2], fake_send as *const ());
        assert!(unsafe { hook.install(&manager, &gamedata, this, MessageMode::Legacy) }.is_err());

        assert_eq!(begin(3) as usize, ENGINE_BUFFER);
        end();
        assert_eq!(calls(), (1, 1, 0));

        let scratch = begin(7);
        assert_ne!(scratch as usize, ENGINE_BUFFER);
        assert!(!scratch.is_null());
        end();
        assert_eq!(calls(), (1, 1, 0));

        hook.uninstall(&manager);
        assert_eq!(table[0], fake_begin as *const ());
        assert_eq!(table[1], fake_end as *const ());
        assert!(manager.is_empty());
        assert_eq!(hook.mode(), None);

        // Protobuf
        unsafe { hook.install(&manager, &gamedata, this, MessageMode::Protobuf).unwrap() };
        assert_eq!(table[0], fake_begin as *const ());

        send(3);
        end();
        assert_eq!(calls(), (1, 2, 1));

        send(7);
        assert_eq!(calls(), (1, 2, 1));
        end();
        assert_eq!(calls(), (1, 3, 1));

        hook.uninstall(&manager);
        assert_eq!(table[2], fake_send as *const ());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_install_is_all_or_nothing() {
        let gamedata = Gamedata::default().with_offset(USER_MESSAGE_BEGIN, 0);
        let hook = Arc::new(UserMessageHook::new());

        let mut table = Box::new([fake_begin as *const (), fake_end as *const ()]);
        let mut engine = FakeEngine {
            vtable: table.as_mut_ptr(),
        };
        let this = &mut engine as *mut FakeEngine as *mut IVEngineServer;
        let manager = VTableHookManager::new();

        let result = unsafe { hook.install(&manager, &gamedata, this, MessageMode::Legacy) };
        assert!(matches!(result, Err(HookError::Gamedata(_))));
        assert!(manager.is_empty());
        assert_eq!(table[0], fake_begin as *const ());
        assert_eq!(hook.mode(), None);
    }
}
