//! Foreground-window detection. [GenericProbe] is the main artifact of this
//! module: it hides the platform-specific query behind the
//! [ActiveWindowProbe] contract.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Identity of the window in foreground use at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowSample {
    /// Full path to the executable. For example /usr/bin/nvim
    pub process_name: Arc<str>,
    /// Name of the window. For example 'bash in hello' or 'Document 1'
    pub window_title: Arc<str>,
}

/// Contract the platform implementations must fulfill. A query may fail; a
/// query may also succeed with [None] when no window is detectable (empty
/// desktop, lock screen). Callers decide how much the two cases differ.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActiveWindowProbe: Send + 'static {
    async fn sample(&mut self) -> Result<Option<ActiveWindowSample>>;
}

/// Cross-platform [ActiveWindowProbe]. Without a platform feature it falls
/// back to [StubProbe] so the engine still runs end to end.
pub struct GenericProbe {
    inner: Box<dyn ActiveWindowProbe>,
}

impl GenericProbe {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsProbe;
                Ok(Self {
                    inner: Box::new(WindowsProbe::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11Probe;
                Ok(Self {
                    inner: Box::new(X11Probe::new()?),
                })
            }
            else {
                Ok(Self {
                    inner: Box::new(StubProbe::default()),
                })
            }
        }
    }
}

#[async_trait]
impl ActiveWindowProbe for GenericProbe {
    async fn sample(&mut self) -> Result<Option<ActiveWindowSample>> {
        self.inner.sample().await
    }
}

/// Feature-less fallback returning a fixed window identity.
#[derive(Default)]
pub struct StubProbe;

#[async_trait]
impl ActiveWindowProbe for StubProbe {
    async fn sample(&mut self) -> Result<Option<ActiveWindowSample>> {
        Ok(Some(ActiveWindowSample {
            process_name: "StubApp".into(),
            window_title: "Stub Window Title".into(),
        }))
    }
}
