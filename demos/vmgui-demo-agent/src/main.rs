//! Minimal demo agent: connects to the host daemon, creates one window
//! with a half-shaded frame, and prints every event it receives.

use vmgui_agent::{Agent, AgentEvent};

fn main() -> Result<(), vmgui_agent::Error> {
    tracing_subscriber::fmt::init();

    let domain = 0;
    let peer = 0;
    let agent = Agent::connect(domain, peer)?;
    println!("connected; root config: {:?}", agent.root_config());

    let (width, height) = (512, 256);
    let rectangle = vmgui_proto::Rectangle::new(
        vmgui_proto::Coordinates::new(50, 400),
        vmgui_proto::WindowSize::new(width, height),
    );
    let window = agent.create_window(rectangle, false)?;

    let buf = window.alloc_buffer(width, height)?;
    let shade = vec![0x00FF_00u32; (width * height / 2) as usize];
    buf.front().write(vmgui_wire::as_bytes(&shade[..]), 0);

    window.set_title("vmgui demo agent")?;
    window.set_class("vmgui-demo", "VmguiDemo")?;
    window.map(vmgui_proto::MapInfo {
        transient_for: 0,
        override_redirect: 0,
    })?;

    loop {
        match agent.poll_event() {
            Ok(None) => continue,
            Ok(Some((id, AgentEvent::Close))) => {
                println!("window {}: close requested, exiting", id.get());
                return Ok(());
            }
            Ok(Some((id, event))) => print_event(id.get(), &event),
            Err(vmgui_agent::Error::SessionFatal(e)) => {
                eprintln!("session ended: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

fn print_event(window: u32, event: &AgentEvent) {
    match event {
        AgentEvent::Keypress(m) => println!("window {}: keypress {:?}", window, m),
        AgentEvent::Button(m) => println!("window {}: button {:?}", window, m),
        AgentEvent::Motion(m) => println!("window {}: motion {:?}", window, m),
        AgentEvent::Crossing(m) => println!("window {}: crossing {:?}", window, m),
        AgentEvent::Focus(m) => println!("window {}: focus {:?}", window, m),
        AgentEvent::Map(m) => println!("window {}: map {:?}", window, m),
        AgentEvent::Configure(m) => println!("window {}: configure {:?}", window, m),
        AgentEvent::Close => println!("window {}: close requested", window),
        AgentEvent::ClipboardReq => println!("window {}: clipboard requested", window),
        AgentEvent::ClipboardData(data) => println!("window {}: clipboard paste {:?}", window, data),
        AgentEvent::Keymap(m) => println!("window {}: keymap notify {:?}", window, m),
        AgentEvent::WindowFlags(m) => println!("window {}: window flags {:?}", window, m),
        _ => {}
    }
}
