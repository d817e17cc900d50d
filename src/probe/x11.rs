use anyhow::Result;
use async_trait::async_trait;
use sysinfo::Pid;
use tracing::instrument;
use xcb::{
    x::{self, Atom, GetProperty, GrabServer, InternAtom, UngrabServer, Window, ATOM_ANY},
    Connection,
};

use super::{ActiveWindowProbe, ActiveWindowSample};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn window_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    let result_slice = result.value::<u32>();
    if result_slice.is_empty() {
        return Ok(None);
    }
    Ok(Some(result_slice[0]))
}

fn process_name(id: u32) -> Option<String> {
    let system = sysinfo::System::new_all();
    let process = system.process(Pid::from_u32(id))?;

    process.exe().and_then(|v| v.to_str()).map(|v| v.to_string())
}

fn active_window(conn: &Connection, root: &Window, active_window_atom: Atom) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: *root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<Window>().first().copied())
}

fn window_title(conn: &Connection, window: Window, wm_name_atom: Atom) -> Result<String> {
    let wm_name = conn.wait_for_reply(conn.send_request(&x::GetProperty {
        delete: false,
        window,
        property: wm_name_atom,
        r#type: x::ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(String::from_utf8_lossy(wm_name.value()).into_owned())
}

pub struct X11Probe {
    connection: Connection,
    preferred_screen: i32,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
}

impl X11Probe {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen,
            active_window_atom,
            window_name_atom,
            pid_atom,
        })
    }

    #[instrument(skip(self))]
    fn sample_inner(&self) -> Result<Option<ActiveWindowSample>> {
        let setup = self.connection.get_setup();

        // Currently only 1 x11 screen is supported.
        let root = setup
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .unwrap()
            .root();

        let Some(active_window) = active_window(&self.connection, &root, self.active_window_atom)?
        else {
            return Ok(None);
        };
        let window_title = window_title(&self.connection, active_window, self.window_name_atom)?;
        let Some(pid) = window_pid(&self.connection, active_window, self.pid_atom)? else {
            return Ok(None);
        };
        let Some(process_name) = process_name(pid) else {
            return Ok(None);
        };
        Ok(Some(ActiveWindowSample {
            process_name: process_name.into(),
            window_title: window_title.into(),
        }))
    }
}

#[async_trait]
impl ActiveWindowProbe for X11Probe {
    #[instrument(skip(self))]
    async fn sample(&mut self) -> Result<Option<ActiveWindowSample>> {
        let _ = self.connection.send_request(&GrabServer {});

        let result = self.sample_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }
}
