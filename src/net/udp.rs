//! Datagram adapter used to run Modbus TCP framing over UDP.
//!
//! Every frame written by the codec is sent as one datagram. Received datagrams are buffered
//! and handed out as a byte stream, which is all the Modbus TCP framing needs to split them
//! again by their MBAP length field.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;

/// Largest Modbus TCP ADU (7 byte MBAP header + 253 byte PDU).
const MAX_DATAGRAM: usize = 260;

#[derive(Debug)]
pub struct UdpStream {
    socket: UdpSocket,
    pending: Vec<u8>,
    offset: usize,
}

impl UdpStream {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        Ok(Self {
            socket,
            pending: Vec::with_capacity(MAX_DATAGRAM),
            offset: 0,
        })
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Empty datagrams carry no frame bytes and must not look like EOF to the codec.
        while this.offset >= this.pending.len() {
            let mut datagram = [0u8; MAX_DATAGRAM];
            let mut received = ReadBuf::new(&mut datagram);
            ready!(this.socket.poll_recv(cx, &mut received))?;
            this.pending.clear();
            this.pending.extend_from_slice(received.filled());
            this.offset = 0;
        }
        let len = std::cmp::min(buf.remaining(), this.pending.len() - this.offset);
        buf.put_slice(&this.pending[this.offset..this.offset + len]);
        this.offset += len;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
