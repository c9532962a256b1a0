//! Local control channel used by the viewer's service side.
//!
//! A listener hands out one connected byte stream per [`accept`] call. Each
//! accepted peer goes through [`verify_peer`]: a connection is refused only
//! when the connecting process is known to run a different executable than
//! this one. Missing OS support or a failed lookup lets the peer through.
//!
//! [`accept`]: ControlListener::accept

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Connected control-channel byte stream.
pub trait ControlStream: Read + Write + Send {}

impl<T: Read + Write + Send> ControlStream for T {}

pub trait ControlListener {
    /// Block until a peer connects or `timeout` elapses, in which case
    /// [`RenderError::Timeout`] is returned.
    fn accept(&mut self, timeout: Duration) -> RenderResult<Box<dyn ControlStream>>;
}

/// Process-wide record of an optional OS entry point used for peer checks.
///
/// Resolved once and read thereafter; `entry` is `None` when the running OS
/// does not offer the lookup.
#[derive(Clone, Copy, Debug)]
pub struct PeerIdentityCheck<E> {
    entry: Option<E>,
}

impl<E: Copy> PeerIdentityCheck<E> {
    pub fn resolve(lookup: impl FnOnce() -> Option<E>) -> Self {
        let entry = lookup();
        debug!(available = entry.is_some(), "peer identity check resolved");
        Self { entry }
    }

    pub const fn unavailable() -> Self {
        Self { entry: None }
    }

    pub fn is_available(&self) -> bool {
        self.entry.is_some()
    }

    pub fn entry(&self) -> Option<E> {
        self.entry
    }
}

/// Executable lookups for one connected peer.
pub trait PeerInspector {
    fn check_available(&self) -> bool;

    /// Image path of the connecting process, `None` if the lookup failed.
    fn peer_image(&self) -> Option<PathBuf>;

    /// Image path of this process, `None` if the lookup failed.
    fn own_image(&self) -> Option<PathBuf>;
}

/// Best-effort executable identity check for an accepted peer.
pub fn verify_peer(inspector: &dyn PeerInspector) -> RenderResult<()> {
    if !inspector.check_available() {
        debug!("peer identity check unavailable, accepting peer");
        return Ok(());
    }
    let Some(peer) = inspector.peer_image() else {
        debug!("peer executable lookup failed, accepting peer");
        return Ok(());
    };
    let Some(own) = inspector.own_image() else {
        debug!("own executable lookup failed, accepting peer");
        return Ok(());
    };

    if same_image(&peer, &own) {
        return Ok(());
    }
    warn!(
        peer = %peer.display(),
        own = %own.display(),
        "control peer runs a different executable"
    );
    Err(RenderError::PeerRejected(format!(
        "peer executable {} differs from {}",
        peer.display(),
        own.display()
    )))
}

fn same_image(peer: &Path, own: &Path) -> bool {
    // Windows paths compare case-insensitively.
    if cfg!(windows) {
        peer.as_os_str()
            .to_string_lossy()
            .eq_ignore_ascii_case(&own.as_os_str().to_string_lossy())
    } else {
        peer == own
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    struct Inspector {
        available: bool,
        peer: Option<&'static str>,
        own: Option<&'static str>,
    }

    impl PeerInspector for Inspector {
        fn check_available(&self) -> bool {
            self.available
        }

        fn peer_image(&self) -> Option<PathBuf> {
            self.peer.map(PathBuf::from)
        }

        fn own_image(&self) -> Option<PathBuf> {
            self.own.map(PathBuf::from)
        }
    }

    #[test]
    fn matching_executable_is_accepted() -> RenderResult<()> {
        verify_peer(&Inspector {
            available: true,
            peer: Some("/opt/viewer/bin/viewer"),
            own: Some("/opt/viewer/bin/viewer"),
        })
    }

    #[test]
    fn different_executable_is_rejected() {
        let result = verify_peer(&Inspector {
            available: true,
            peer: Some("/tmp/intruder"),
            own: Some("/opt/viewer/bin/viewer"),
        });
        assert!(matches!(result, Err(RenderError::PeerRejected(_))));
    }

    #[test]
    fn unavailable_or_failed_lookups_accept() -> RenderResult<()> {
        verify_peer(&Inspector {
            available: false,
            peer: Some("/tmp/intruder"),
            own: Some("/opt/viewer/bin/viewer"),
        })?;
        verify_peer(&Inspector {
            available: true,
            peer: None,
            own: Some("/opt/viewer/bin/viewer"),
        })?;
        verify_peer(&Inspector {
            available: true,
            peer: Some("/tmp/intruder"),
            own: None,
        })
    }

    #[test]
    fn capability_record_resolves_once() {
        static CHECK: OnceLock<PeerIdentityCheck<u32>> = OnceLock::new();
        let mut calls = 0;
        let first = *CHECK.get_or_init(|| {
            PeerIdentityCheck::resolve(|| {
                calls += 1;
                Some(7)
            })
        });
        let second = *CHECK.get_or_init(|| PeerIdentityCheck::unavailable());

        assert_eq!(calls, 1);
        assert!(first.is_available());
        assert_eq!(second.entry(), Some(7));
    }
}
