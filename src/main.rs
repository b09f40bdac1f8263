use ripplefs::vfs::demo;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo-mem") => match demo::e2e_memory_demo().await {
            Ok(()) => println!("demo-mem: OK"),
            Err(e) => {
                eprintln!("demo-mem failed: {e}");
                std::process::exit(1);
            }
        },
        _ => {
            println!("Hello, I'm RippleFS!\nUsage:\n  ripplefs demo-mem");
        }
    }
}
