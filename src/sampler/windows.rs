//! Window title lookup using the Win32 window enumeration API.
//!
//! Every visible top-level window with a non-empty title is attributed to its
//! owning process. The first such window seen for a process wins, which is the
//! topmost one in z-order.

use std::collections::HashMap;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

/// Map of process id to main window title.
pub fn window_titles() -> HashMap<u32, String> {
    let mut titles: HashMap<u32, String> = HashMap::new();

    // SAFETY: the callback only runs for the duration of EnumWindows and
    // `titles` outlives that call.
    let result = unsafe {
        EnumWindows(
            Some(collect_title),
            LPARAM(&mut titles as *mut HashMap<u32, String> as isize),
        )
    };

    if let Err(e) = result {
        tracing::warn!("window enumeration stopped early: {e}");
    }

    titles
}

/// EnumWindows callback. Always continues enumeration.
unsafe extern "system" fn collect_title(hwnd: HWND, l_param: LPARAM) -> BOOL {
    let titles = &mut *(l_param.0 as *mut HashMap<u32, String>);

    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL(1);
    }

    let len = GetWindowTextLengthW(hwnd);
    if len <= 0 {
        return BOOL(1);
    }

    let mut buf = vec![0u16; len as usize + 1];
    let copied = GetWindowTextW(hwnd, &mut buf);
    if copied <= 0 {
        return BOOL(1);
    }
    let title = String::from_utf16_lossy(&buf[..copied as usize]);

    let mut pid = 0u32;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));
    if pid != 0 {
        titles.entry(pid).or_insert(title);
    }

    BOOL(1)
}
