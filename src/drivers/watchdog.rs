//! Watchdog timer driver.
//!
//! On ESP-IDF this wraps the Task Watchdog Timer: if the control loop
//! stalls past the timeout the MCU resets, and the next boot reads the
//! reset cause.  On host targets the watchdog is a simulated countdown
//! pet by the supervisor tick, whose expiry is surfaced through the
//! safety status instead of a reboot.
//!
//! The supervisor must call `pet()` on every safety tick.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

/// Why the MCU last booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    Normal,
    Watchdog,
}

/// Reset cause of the previous boot.  Off-target there is no reset
/// hardware, so the answer is always `Normal`.
#[cfg(target_os = "espidf")]
pub fn reset_reason() -> ResetReason {
    // SAFETY: plain FFI query with no side effects.
    let cause = unsafe { esp_reset_reason() };
    if cause == esp_reset_reason_t_ESP_RST_TASK_WDT
        || cause == esp_reset_reason_t_ESP_RST_INT_WDT
        || cause == esp_reset_reason_t_ESP_RST_WDT
    {
        ResetReason::Watchdog
    } else {
        ResetReason::Normal
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn reset_reason() -> ResetReason {
    ResetReason::Normal
}

pub struct Watchdog {
    enabled: bool,
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    timeout_ms: u64,
    /// 0 = not yet armed; arming happens on the first pet.
    #[cfg(not(target_os = "espidf"))]
    last_pet_ms: u64,
}

impl Watchdog {
    pub fn new(enabled: bool, timeout_secs: u32) -> Self {
        if !enabled {
            info!("watchdog: disabled by settings");
        }

        #[cfg(target_os = "espidf")]
        {
            let mut subscribed = false;
            if enabled {
                // SAFETY: single-threaded boot context, before any
                // concurrent TWDT use.
                unsafe {
                    let cfg = esp_task_wdt_config_t {
                        timeout_ms: timeout_secs * 1000,
                        idle_core_mask: 0,
                        trigger_panic: true,
                    };
                    let ret = esp_task_wdt_reconfigure(&cfg);
                    if ret != ESP_OK {
                        warn!("watchdog: reconfigure returned {ret}");
                    }
                    subscribed = esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK;
                }
                if subscribed {
                    info!("watchdog: armed ({timeout_secs} s timeout)");
                } else {
                    warn!("watchdog: failed to subscribe");
                }
            }
            Self {
                enabled,
                subscribed,
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            if enabled {
                info!("watchdog(sim): countdown armed on first pet ({timeout_secs} s)");
            }
            Self {
                enabled,
                timeout_ms: u64::from(timeout_secs) * 1000,
                last_pet_ms: 0,
            }
        }
    }

    /// Feed the watchdog.  Must be called at least once per timeout.
    pub fn pet(&mut self, now_ms: u64) {
        if !self.enabled {
            return;
        }

        #[cfg(target_os = "espidf")]
        {
            let _ = now_ms;
            if self.subscribed {
                // SAFETY: task is subscribed; plain FFI reset call.
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.last_pet_ms = now_ms;
        }
    }

    /// Host-only expiry probe.  On ESP-IDF the hardware reboots instead,
    /// so this always reports `false` there.
    pub fn expired(&self, now_ms: u64) -> bool {
        #[cfg(target_os = "espidf")]
        {
            let _ = now_ms;
            false
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.enabled
                && self.last_pet_ms != 0
                && now_ms.saturating_sub(self.last_pet_ms) > self.timeout_ms
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn host_reset_reason_is_always_normal() {
        assert_eq!(reset_reason(), ResetReason::Normal);
    }

    #[test]
    fn countdown_expires_without_pets() {
        let mut wd = Watchdog::new(true, 30);
        assert!(!wd.expired(10_000)); // Not armed until the first pet.

        wd.pet(10_000);
        assert!(!wd.expired(40_000)); // Exactly at the limit.
        assert!(wd.expired(40_001));

        wd.pet(40_001);
        assert!(!wd.expired(50_000));
    }

    #[test]
    fn disabled_watchdog_never_expires() {
        let mut wd = Watchdog::new(false, 30);
        wd.pet(1000);
        assert!(!wd.expired(1_000_000));
    }
}
