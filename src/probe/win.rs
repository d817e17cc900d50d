use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::error;
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, GetLastError, BOOL, HANDLE, HWND},
        System::{
            Diagnostics::Debug::{
                FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
            },
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
            Threading::{
                OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
                PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
            },
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
};

use super::{ActiveWindowProbe, ActiveWindowSample};

#[tracing::instrument]
pub fn sample_foreground_window() -> Result<Option<ActiveWindowSample>> {
    let window = unsafe { GetForegroundWindow() };

    // No foreground window at all, e.g. the lock screen owns the desktop.
    if window.is_invalid() {
        return Ok(None);
    }

    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    if id == 0 {
        let err = unsafe { GetLastError() };
        let mut message_buffer = [0u16; 2048];
        let size = unsafe {
            FormatMessageW(
                FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
                None,
                err.0,
                LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
                PWSTR::from_raw(message_buffer.as_mut_ptr()),
                2048,
                None,
            )
        };
        if size == 0 {
            return Err(anyhow!("Failed to resolve foreground window process"));
        } else {
            let data =
                String::from_utf16(&message_buffer[0..size as usize]).expect("Failed to unwrap");
            return Err(anyhow!("Failed to resolve foreground window process {data}"));
        }
    }
    let process_handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            BOOL::from(false),
            id,
        )
    }
    .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let process_name = unsafe { window_process_path(process_handle, &mut text) }
        .inspect_err(|e| error!("Failed to get window process path {e:?}"))?;
    let title = unsafe { window_title(window, &mut text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;

    Ok(Some(ActiveWindowSample {
        process_name: process_name.into(),
        window_title: title.into(),
    }))
}

unsafe fn window_process_path(window_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            window_handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len as usize])
}

pub struct WindowsProbe {}

impl WindowsProbe {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActiveWindowProbe for WindowsProbe {
    async fn sample(&mut self) -> Result<Option<ActiveWindowSample>> {
        sample_foreground_window().inspect_err(|e| error!("Failed to sample foreground window {e:?}"))
    }
}
