//! Windows backend.
//!
//! Theme flags live under `HKCU\...\Themes\Personalize` as two DWORDs
//! (`AppsUseLightTheme`, `SystemUsesLightTheme`; 1 = light). After a write,
//! running applications are told to re-read them with a `WM_SETTINGCHANGE`
//! broadcast carrying `"ImmersiveColorSet"`.
//!
//! The pump thread owns a hidden top-level window. Hotkeys are registered
//! against it, and session-end notifications (`WM_QUERYENDSESSION`,
//! `WM_ENDSESSION`) reach the service through its window procedure.
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    ffi::c_void,
    iter, mem,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use windows::{
    Win32::{
        Foundation::{
            ERROR_ACCESS_DENIED, ERROR_BUSY, ERROR_FILE_NOT_FOUND, ERROR_HOTKEY_ALREADY_REGISTERED,
            ERROR_HOTKEY_NOT_REGISTERED, ERROR_TIMEOUT, HWND, LPARAM, LRESULT, WAIT_FAILED,
            WIN32_ERROR, WPARAM,
        },
        System::{
            LibraryLoader::GetModuleHandleW,
            Registry::{
                HKEY_CURRENT_USER, REG_DWORD, RRF_RT_REG_DWORD, RegGetValueW, RegSetKeyValueW,
            },
            Threading::GetCurrentThreadId,
        },
        UI::{
            Input::KeyboardAndMouse::{
                HOT_KEY_MODIFIERS, MOD_NOREPEAT, RegisterHotKey, UnregisterHotKey,
            },
            WindowsAndMessaging::{
                CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, HWND_BROADCAST,
                MSG, MsgWaitForMultipleObjects, PM_REMOVE, PeekMessageW, PostThreadMessageW,
                QS_ALLINPUT, RegisterClassW, SMTO_ABORTIFHUNG, SendMessageTimeoutW,
                TranslateMessage, WINDOW_EX_STYLE, WM_CLOSE, WM_ENDSESSION, WM_HOTKEY,
                WM_QUERYENDSESSION, WM_QUIT, WM_SETTINGCHANGE, WNDCLASSW, WS_OVERLAPPED,
            },
        },
    },
    core::{Error as WinError, PCWSTR, w},
};

use crate::{
    Chord, HandleAllocator, HotkeyHandle, Platform, PlatformError, PlatformEvent, PlatformEvents,
    PlatformOptions, Result, Theme, ThemeBackup,
};

/// Registry key holding both theme flags.
const PERSONALIZE: PCWSTR = w!(r"Software\Microsoft\Windows\CurrentVersion\Themes\Personalize");
/// Per-application flag.
const APPS_VALUE: &str = "AppsUseLightTheme";
/// Shell and taskbar flag.
const SYSTEM_VALUE: &str = "SystemUsesLightTheme";
/// `RegisterHotKey` only accepts ids in `0x0000..=0xBFFF` for applications.
const HOTKEY_ID_LIMIT: u32 = 0xC000;

thread_local! {
    /// Hidden window owned by the pump thread.
    static SURFACE: RefCell<Option<HWND>> = const { RefCell::new(None) };
    /// Set by the window procedure when the session is ending.
    static SESSION_ENDING: Cell<bool> = const { Cell::new(false) };
}

/// Theme and hotkey backend for Windows 10 and later.
#[derive(Debug)]
pub struct WindowsPlatform {
    /// Which flags to write and how to notify.
    opts: PlatformOptions,
    /// Thread id of the bound pump thread, 0 when unbound.
    pump_thread: AtomicU32,
    /// Hotkey ids.
    ids: HandleAllocator,
    /// Live registrations, for logging and `WM_HOTKEY` filtering.
    hotkeys: Mutex<HashMap<HotkeyHandle, Chord>>,
}

impl WindowsPlatform {
    /// Backend configured with `opts`.
    pub fn new(opts: PlatformOptions) -> Self {
        Self {
            opts,
            pump_thread: AtomicU32::new(0),
            ids: HandleAllocator::new(1, HOTKEY_ID_LIMIT),
            hotkeys: Mutex::new(HashMap::new()),
        }
    }

    /// Fail unless the caller is the bound pump thread.
    fn ensure_pump_thread(&self, op: &str) -> Result<()> {
        let bound = self.pump_thread.load(Ordering::SeqCst);
        // SAFETY: no preconditions.
        let me = unsafe { GetCurrentThreadId() };
        if bound == 0 || bound != me {
            return Err(PlatformError::Fatal(format!(
                "{op} must run on the thread that called start_service"
            )));
        }
        Ok(())
    }

    /// Value names selected by the options, in write order.
    fn selected_values(&self) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(2);
        if self.opts.apply_apps {
            out.push(APPS_VALUE);
        }
        if self.opts.apply_system {
            out.push(SYSTEM_VALUE);
        }
        out
    }

    /// Tell running applications the color set changed. Failures are logged only.
    fn broadcast(&self) {
        if !self.opts.broadcast_setting_change {
            return;
        }
        let timeout = u32::try_from(self.opts.call_timeout.as_millis()).unwrap_or(u32::MAX);
        let area = w!("ImmersiveColorSet");
        let mut result = 0usize;
        // SAFETY: `area` is a static NUL-terminated wide string that outlives the call.
        let sent = unsafe {
            SendMessageTimeoutW(
                HWND_BROADCAST,
                WM_SETTINGCHANGE,
                WPARAM(0),
                LPARAM(area.as_ptr() as isize),
                SMTO_ABORTIFHUNG,
                timeout,
                Some(&mut result),
            )
        };
        if sent.0 == 0 {
            warn!(timeout_ms = timeout, "setting_change_broadcast_failed");
        } else {
            trace!("setting_change_broadcast");
        }
    }
}

/// Wide, NUL-terminated copy of `s`.
fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

/// Map a Win32 status onto the platform taxonomy.
fn classify(code: WIN32_ERROR, ctx: &str) -> PlatformError {
    let msg = format!("{ctx}: win32 error {}", code.0);
    match code {
        ERROR_ACCESS_DENIED => PlatformError::PermissionDenied(msg),
        ERROR_HOTKEY_ALREADY_REGISTERED => PlatformError::ResourceBusy(msg),
        ERROR_BUSY | ERROR_TIMEOUT => PlatformError::Transient(msg),
        _ => PlatformError::Fatal(msg),
    }
}

/// Map a `windows::core::Error` via its HRESULT.
fn classify_error(err: &WinError, ctx: &str) -> PlatformError {
    let code = err.code();
    for known in [
        ERROR_ACCESS_DENIED,
        ERROR_HOTKEY_ALREADY_REGISTERED,
        ERROR_BUSY,
        ERROR_TIMEOUT,
    ] {
        if code == known.to_hresult() {
            return classify(known, ctx);
        }
    }
    PlatformError::Fatal(format!("{ctx}: {err}"))
}

/// Read one DWORD under the personalize key. `Ok(None)` when the value is absent.
fn read_flag(name: &str) -> Result<Option<u32>> {
    let value = wide(name);
    let mut data: u32 = 0;
    let mut size = mem::size_of::<u32>() as u32;
    // SAFETY: `data` and `size` are valid for writes of a DWORD; `value` outlives the call.
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            PERSONALIZE,
            PCWSTR(value.as_ptr()),
            RRF_RT_REG_DWORD,
            None,
            Some((&mut data as *mut u32).cast::<c_void>()),
            Some(&mut size),
        )
    };
    match status {
        s if s.is_ok() => Ok(Some(data)),
        ERROR_FILE_NOT_FOUND => Ok(None),
        s => Err(classify(s, &format!("read {name}"))),
    }
}

/// Write one DWORD under the personalize key, creating the key if needed.
fn write_flag(name: &str, data: u32) -> Result<()> {
    let value = wide(name);
    // SAFETY: `data` is a live DWORD and the size passed matches it.
    let status = unsafe {
        RegSetKeyValueW(
            HKEY_CURRENT_USER,
            PERSONALIZE,
            PCWSTR(value.as_ptr()),
            REG_DWORD.0,
            Some((&data as *const u32).cast::<c_void>()),
            mem::size_of::<u32>() as u32,
        )
    };
    if status.is_ok() {
        Ok(())
    } else {
        Err(classify(status, &format!("write {name}")))
    }
}

/// Window procedure for the hidden surface.
unsafe extern "system" fn surface_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_QUERYENDSESSION => LRESULT(1),
        WM_ENDSESSION => {
            if wparam.0 != 0 {
                SESSION_ENDING.set(true);
            }
            LRESULT(0)
        }
        WM_CLOSE => {
            SESSION_ENDING.set(true);
            LRESULT(0)
        }
        // SAFETY: forwarding the arguments we were given.
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

/// Create the hidden window on the calling thread.
fn create_surface() -> Result<HWND> {
    let class_name = w!("UmbraServiceSurface");
    // SAFETY: the class name is static; the window procedure lives for the program.
    unsafe {
        let instance = GetModuleHandleW(None).map_err(|e| classify_error(&e, "GetModuleHandleW"))?;
        let wc = WNDCLASSW {
            lpfnWndProc: Some(surface_proc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            ..Default::default()
        };
        // Zero means failure or an existing class; CreateWindowExW reports the former.
        RegisterClassW(&wc);
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            class_name,
            w!("umbra"),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            None,
            None,
            Some(instance.into()),
            None,
        )
        .map_err(|e| classify_error(&e, "CreateWindowExW"))
    }
}

/// The calling thread's surface window.
fn surface_hwnd() -> Result<HWND> {
    SURFACE
        .with(|s| *s.borrow())
        .ok_or_else(|| PlatformError::Fatal("event surface not created".into()))
}

/// Destroy the calling thread's surface, if any.
fn destroy_surface() {
    if let Some(hwnd) = SURFACE.with(|s| s.borrow_mut().take()) {
        // SAFETY: `hwnd` was created on this thread and not yet destroyed.
        if let Err(e) = unsafe { DestroyWindow(hwnd) } {
            debug!(error = %e, "destroy_surface_failed");
        }
    }
}

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn set_theme(&self, theme: Theme) -> Result<()> {
        let data = match theme {
            Theme::Light => 1,
            Theme::Dark => 0,
            Theme::FollowSystem => {
                return Err(PlatformError::NotSupported(
                    "follow_system must be resolved before reaching the backend".into(),
                ));
            }
        };
        for name in self.selected_values() {
            write_flag(name, data)?;
        }
        debug!(%theme, "theme_flags_written");
        self.broadcast();
        Ok(())
    }

    fn current_theme(&self) -> Result<Theme> {
        let name = self.selected_values().first().copied().unwrap_or(APPS_VALUE);
        match read_flag(name)? {
            Some(0) => Ok(Theme::Dark),
            Some(_) => Ok(Theme::Light),
            None => {
                warn!(value = name, "theme_flag_missing_assuming_light");
                Ok(Theme::Light)
            }
        }
    }

    fn register_hotkey(&self, chord: &Chord) -> Result<HotkeyHandle> {
        self.ensure_pump_thread("register_hotkey")?;
        let handle = self.ids.allocate()?;
        let mods = HOT_KEY_MODIFIERS(chord.modifiers.to_win32()) | MOD_NOREPEAT;
        // Ids are below HOTKEY_ID_LIMIT so the cast is lossless.
        let id = handle.id() as i32;
        let hwnd = surface_hwnd()?;
        // SAFETY: `hwnd` is the live surface owned by this thread.
        unsafe { RegisterHotKey(Some(hwnd), id, mods, u32::from(chord.key.vk())) }
            .map_err(|e| classify_error(&e, &format!("register {chord}")))?;
        self.hotkeys.lock().insert(handle, *chord);
        debug!(%chord, %handle, "hotkey_registered");
        Ok(handle)
    }

    fn unregister_hotkey(&self, handle: HotkeyHandle) -> Result<()> {
        let Some(chord) = self.hotkeys.lock().remove(&handle) else {
            return Ok(());
        };
        self.ensure_pump_thread("unregister_hotkey")?;
        // The surface is gone after shutdown; its hotkeys went with it.
        let Ok(hwnd) = surface_hwnd() else {
            return Ok(());
        };
        // SAFETY: the id was registered against `hwnd` on this thread.
        match unsafe { UnregisterHotKey(Some(hwnd), handle.id() as i32) } {
            Ok(()) => {
                debug!(%chord, %handle, "hotkey_unregistered");
                Ok(())
            }
            Err(e) if e.code() == ERROR_HOTKEY_NOT_REGISTERED.to_hresult() => Ok(()),
            Err(e) => Err(classify_error(&e, &format!("unregister {chord}"))),
        }
    }

    fn pump_events(&self, timeout: Duration) -> Result<PlatformEvents> {
        self.ensure_pump_thread("pump_events")?;
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        // SAFETY: no handles are passed; the wait only watches the message queue.
        let wait = unsafe { MsgWaitForMultipleObjects(None, false, ms, QS_ALLINPUT) };
        if wait == WAIT_FAILED {
            return Err(PlatformError::Fatal("MsgWaitForMultipleObjects failed".into()));
        }
        let mut batch = PlatformEvents::empty();
        let mut msg = MSG::default();
        // SAFETY: `msg` is a valid out-parameter for every iteration.
        while unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.as_bool() {
            match msg.message {
                WM_HOTKEY => {
                    let id = msg.wParam.0 as u32;
                    let hit = self.hotkeys.lock().keys().find(|h| h.id() == id).copied();
                    match hit {
                        Some(h) => batch.push(PlatformEvent::HotkeyFired(h)),
                        None => trace!(id, "stale_hotkey_message"),
                    }
                }
                WM_QUIT => batch.push(PlatformEvent::ShutdownRequested),
                _ => {
                    // SAFETY: `msg` was just filled in by PeekMessageW.
                    unsafe {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }
            }
        }
        if SESSION_ENDING.replace(false) {
            batch.push(PlatformEvent::ShutdownRequested);
        }
        if batch.clone().any(|e| e == PlatformEvent::ShutdownRequested) {
            destroy_surface();
        }
        Ok(batch)
    }

    fn start_service(&self) -> Result<()> {
        // SAFETY: no preconditions.
        let me = unsafe { GetCurrentThreadId() };
        if let Err(other) = self
            .pump_thread
            .compare_exchange(0, me, Ordering::SeqCst, Ordering::SeqCst)
        {
            if other == me {
                return Ok(());
            }
            return Err(PlatformError::ResourceBusy(
                "event surface already bound to another thread".into(),
            ));
        }
        let hwnd = match create_surface() {
            Ok(h) => h,
            Err(e) => {
                self.pump_thread.store(0, Ordering::SeqCst);
                return Err(e);
            }
        };
        SURFACE.with(|s| *s.borrow_mut() = Some(hwnd));
        SESSION_ENDING.set(false);
        debug!(thread = me, "event_surface_bound");
        Ok(())
    }

    fn stop_service(&self) -> Result<()> {
        let tid = self.pump_thread.load(Ordering::SeqCst);
        if tid == 0 {
            return Ok(());
        }
        // SAFETY: posting to a thread id; fails harmlessly if the thread is gone.
        if let Err(e) = unsafe { PostThreadMessageW(tid, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            debug!(error = %e, thread = tid, "stop_post_failed");
        }
        Ok(())
    }

    fn capture_backup(&self) -> Result<ThemeBackup> {
        let mut backup = ThemeBackup::default();
        for name in [APPS_VALUE, SYSTEM_VALUE] {
            if let Some(v) = read_flag(name)? {
                backup.values.insert(name.to_string(), v);
            }
        }
        Ok(backup)
    }

    fn restore_backup(&self, backup: &ThemeBackup) -> Result<()> {
        for (name, v) in &backup.values {
            write_flag(name, *v)?;
        }
        self.broadcast();
        Ok(())
    }
}
