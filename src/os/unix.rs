// OS abstraction layer for tcpbench - Unix implementation
// (c) 2024 Ross Younger

use super::TransportStatistics;
use crate::telemetry::TransportSample;
use std::os::fd::{AsFd, OwnedFd};

/// Reads `TCP_INFO` from a socket.
///
/// The probe holds its own duplicate of the socket descriptor. It never reads or
/// writes application data, so it is safe to use while another task is busy with
/// the same connection.
#[derive(Debug)]
pub struct SocketProbe {
    fd: OwnedFd,
}

impl SocketProbe {
    /// Creates a probe for a socket
    pub fn new<S: AsFd>(socket: &S) -> std::io::Result<Self> {
        Ok(Self {
            fd: socket.as_fd().try_clone_to_owned()?,
        })
    }
}

impl TransportStatistics for SocketProbe {
    #[cfg(target_os = "linux")]
    fn transport_sample(&self) -> Option<TransportSample> {
        linux::tcp_info(&self.fd).map(linux::RawTcpInfo::to_sample)
    }

    #[cfg(not(target_os = "linux"))]
    fn transport_sample(&self) -> Option<TransportSample> {
        // The BSDs have TCP_INFO too, but with a different layout. Not yet supported.
        None
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use crate::telemetry::TransportSample;
    use nix::libc;
    use std::os::fd::{AsFd, AsRawFd as _};

    /// Leading part of the kernel's `struct tcp_info` (`include/uapi/linux/tcp.h`).
    ///
    /// The kernel copies at most the length we ask for, so a prefix is fine.
    /// Older kernels supply less; the fields they don't know about stay zero.
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    #[allow(dead_code)] // kernel layout; only some fields are read
    pub(super) struct RawTcpInfo {
        state: u8,
        ca_state: u8,
        retransmits: u8,
        probes: u8,
        backoff: u8,
        options: u8,
        wscale: u8,
        app_limited: u8,
        rto: u32,
        ato: u32,
        snd_mss: u32,
        rcv_mss: u32,
        unacked: u32,
        sacked: u32,
        lost: u32,
        retrans: u32,
        fackets: u32,
        last_data_sent: u32,
        last_ack_sent: u32,
        last_data_recv: u32,
        last_ack_recv: u32,
        pmtu: u32,
        rcv_ssthresh: u32,
        rtt: u32,
        rttvar: u32,
        snd_ssthresh: u32,
        snd_cwnd: u32,
        advmss: u32,
        reordering: u32,
        rcv_rtt: u32,
        rcv_space: u32,
        total_retrans: u32,
        pacing_rate: u64,
        max_pacing_rate: u64,
        bytes_acked: u64,
        bytes_received: u64,
        segs_out: u32,
        segs_in: u32,
    }

    static_assertions::const_assert_eq!(std::mem::size_of::<RawTcpInfo>(), 144);

    impl RawTcpInfo {
        pub(super) fn to_sample(self) -> TransportSample {
            TransportSample {
                timestamp: time::OffsetDateTime::now_utc(),
                round_trip_time: self.rtt,
                round_trip_time_variance: self.rttvar,
                congestion_window: self.snd_cwnd,
                slow_start_threshold: self.snd_ssthresh,
                current_retransmits: self.retransmits,
                retransmit_count: self.total_retrans,
                bytes_acknowledged: self.bytes_acked,
                bytes_received: self.bytes_received,
                segments_out: self.segs_out,
                segments_in: self.segs_in,
            }
        }
    }

    #[allow(unsafe_code)]
    pub(super) fn tcp_info<F: AsFd>(fd: &F) -> Option<RawTcpInfo> {
        let mut info = RawTcpInfo::default();
        #[allow(clippy::cast_possible_truncation)]
        let mut len = std::mem::size_of::<RawTcpInfo>() as libc::socklen_t;
        // SAFETY: `info` is a plain C struct of `len` bytes which outlives the call;
        // the kernel writes at most `len` bytes into it.
        let rc = unsafe {
            libc::getsockopt(
                fd.as_fd().as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                std::ptr::addr_of_mut!(info).cast(),
                &mut len,
            )
        };
        if rc != 0 {
            tracing::trace!(
                "TCP_INFO unavailable: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }
        Some(info)
    }
}

#[cfg(test)]
mod test {
    use super::SocketProbe;
    use crate::os::TransportStatistics as _;

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn samples_a_tcp_connection() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let client = tokio::net::TcpStream::connect(listener.local_addr()?).await?;
        let (_server, _) = listener.accept().await?;

        let probe = SocketProbe::new(&client)?;
        let sample = probe.transport_sample().expect("loopback TCP should have TCP_INFO");
        assert!(sample.congestion_window > 0);
        Ok(())
    }

    #[test]
    fn udp_socket_yields_nothing() -> anyhow::Result<()> {
        let sock = std::net::UdpSocket::bind("127.0.0.1:0")?;
        let probe = SocketProbe::new(&sock)?;
        assert!(probe.transport_sample().is_none());
        Ok(())
    }
}
