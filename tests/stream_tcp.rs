//! End-to-end stream discipline over loopback TCP: connect, accept,
//! the read family, buffered writes and drain.

mod common;

use common::real_rt;
use microloop::net::{self, TcpListenTransport, TcpTransport};
use microloop::stream::{Listener, Stream};
use microloop::{Error, Runtime};

/// Binds a loopback listener on an OS-assigned port.
fn loopback_listener(rt: &Runtime) -> (Listener<TcpListenTransport>, std::net::SocketAddr) {
    let transport = TcpListenTransport::bind("127.0.0.1:0".parse().unwrap(), 8).unwrap();
    let addr = transport.local_addr().unwrap();
    (Listener::new(rt, transport), addr)
}

#[test]
fn echo_roundtrip() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (mut stream, _peer) = listener.accept().await?;
                let request = stream.read_exactly(5).await?;
                stream.write(&request)?;
                stream.close().await?;
                Ok(())
            });

            let mut client = net::connect(&rt2, addr).await?;
            client.write(b"hello")?;
            client.drain().await?;
            let reply = client.read_exactly(5).await?;
            assert_eq!(&reply, b"hello");
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
    assert!(rt.is_idle());
}

#[test]
fn read_returns_as_soon_as_any_data_arrives() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (mut stream, _peer) = listener.accept().await?;
                stream.write(b"abc")?;
                stream.drain().await?;
                // Hold the connection open so EOF cannot satisfy the
                // read early.
                let _ = stream.read(1).await?;
                Ok(())
            });

            let mut client = net::connect(&rt2, addr).await?;
            let chunk = client.read(1024).await?;
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= 3);
            client.write(b"x")?;
            client.drain().await?;
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn read_exactly_fails_on_early_close() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (mut stream, _peer) = listener.accept().await?;
                stream.write(b"abc")?;
                stream.close().await?;
                Ok(())
            });

            let mut client = net::connect(&rt2, addr).await?;
            let err = client.read_exactly(10).await.unwrap_err();
            assert!(matches!(err, Error::UnexpectedEof));
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn read_line_stops_at_the_terminator() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (mut stream, _peer) = listener.accept().await?;
                stream.write(b"one\ntwo\nrest")?;
                stream.close().await?;
                Ok(())
            });

            let mut client = net::connect(&rt2, addr).await?;
            assert_eq!(client.read_line().await?, b"one\n");
            assert_eq!(client.read_line().await?, b"two\n");
            // EOF ends the last, unterminated line.
            assert_eq!(client.read_line().await?, b"rest");
            assert_eq!(client.read_line().await?, b"");
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn read_to_end_accumulates_across_chunks() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = {
                let rt = rt2.clone();
                rt2.create_task(async move {
                    let (mut stream, _peer) = listener.accept().await?;
                    for chunk in [&b"first "[..], &b"second "[..], &b"third"[..]] {
                        stream.write(chunk)?;
                        stream.drain().await?;
                        rt.sleep_ms(1).await?;
                    }
                    stream.close().await?;
                    Ok(())
                })
            };

            let mut client = net::connect(&rt2, addr).await?;
            let all = client.read_to_end().await?;
            assert_eq!(&all, b"first second third");
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn drain_suspends_even_with_an_empty_buffer() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (stream, _peer) = listener.accept().await?;
                drop(stream);
                Ok(())
            });

            let mut client = net::connect(&rt2, addr).await?;
            let before = rt2.steps();
            client.drain().await?;
            // The mandatory zero-duration sleep is what keeps a tight
            // write+drain loop from starving the scheduler.
            assert!(rt2.steps() > before);
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn concurrent_clients_are_served_by_one_thread() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = {
                let rt = rt2.clone();
                rt2.create_task(async move {
                    for _ in 0..2 {
                        let (mut stream, _peer) = listener.accept().await?;
                        drop(rt.create_task(async move {
                            let line = stream.read_line().await?;
                            stream.write(&line)?;
                            stream.drain().await?;
                            stream.close().await?;
                            Ok(())
                        }));
                    }
                    Ok(())
                })
            };

            let mut alpha = net::connect(&rt2, addr).await?;
            let mut beta = net::connect(&rt2, addr).await?;
            beta.write(b"beta\n")?;
            beta.drain().await?;
            alpha.write(b"alpha\n")?;
            alpha.drain().await?;
            assert_eq!(alpha.read_line().await?, b"alpha\n");
            assert_eq!(beta.read_line().await?, b"beta\n");
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}

#[test]
fn transport_addresses_are_exposed() {
    let rt = real_rt();
    let result: microloop::Result<()> = {
        let rt2 = rt.clone();
        rt.run_until_complete(async move {
            let (mut listener, addr) = loopback_listener(&rt2);
            let server = rt2.create_task(async move {
                let (stream, peer) = listener.accept().await?;
                assert_eq!(stream.transport().peer_addr()?, peer);
                Ok(())
            });

            let transport = TcpTransport::connect(&rt2, addr).await?;
            assert_eq!(transport.peer_addr()?, addr);
            let client = Stream::new(&rt2, transport);
            drop(client);
            server.await?;
            Ok(())
        })
    };
    result.unwrap();
}
