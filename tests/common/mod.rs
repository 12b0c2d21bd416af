use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;

/// Spawns a backend stand-in: accepts connections forever, and on each one
/// loops reading a request and writing `tag` followed by the request bytes
/// back, until the peer disconnects. Lets a test tell which pool
/// (master/replica) a request was actually routed to by its tag.
pub fn spawn_tagged_echo_backend(tag: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
    let addr = listener.local_addr().expect("local_addr");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => continue,
            };
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(tag).is_err() {
                                break;
                            }
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}
