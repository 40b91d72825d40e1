//! Window title lookup using the Quartz window list.
//!
//! Only ordinary application windows (layer 0) that are on screen count.
//! Window names are withheld by the system unless the agent has been granted
//! Screen Recording permission; without it no process qualifies.

use core_foundation::base::{CFType, TCFType};
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::window::{
    copy_window_info, kCGNullWindowID, kCGWindowLayer, kCGWindowListExcludeDesktopElements,
    kCGWindowListOptionOnScreenOnly, kCGWindowName, kCGWindowOwnerPID,
};
use std::collections::HashMap;

/// Map of process id to main window title.
pub fn window_titles() -> HashMap<u32, String> {
    let mut titles = HashMap::new();

    let Some(windows) = copy_window_info(
        kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements,
        kCGNullWindowID,
    ) else {
        tracing::warn!("window list unavailable");
        return titles;
    };

    // SAFETY: these are immutable CFString constants exported by CoreGraphics.
    let (pid_key, name_key, layer_key) = unsafe {
        (
            CFString::wrap_under_get_rule(kCGWindowOwnerPID),
            CFString::wrap_under_get_rule(kCGWindowName),
            CFString::wrap_under_get_rule(kCGWindowLayer),
        )
    };

    // Front to back, so the first window seen for a process is its topmost.
    for item in windows.iter() {
        // SAFETY: every entry of the window list is a CFDictionary.
        let info: CFDictionary<CFString, CFType> =
            unsafe { CFDictionary::wrap_under_get_rule(*item as CFDictionaryRef) };

        if number(&info, &layer_key) != Some(0) {
            continue;
        }
        let Some(pid) = number(&info, &pid_key).and_then(|pid| u32::try_from(pid).ok()) else {
            continue;
        };
        let Some(name) = info
            .find(&name_key)
            .and_then(|value| value.downcast::<CFString>())
            .map(|name| name.to_string())
        else {
            continue;
        };
        if name.trim().is_empty() {
            continue;
        }

        titles.entry(pid).or_insert(name);
    }

    titles
}

fn number(info: &CFDictionary<CFString, CFType>, key: &CFString) -> Option<i64> {
    info.find(key)
        .and_then(|value| value.downcast::<CFNumber>())
        .and_then(|n| n.to_i64())
}
