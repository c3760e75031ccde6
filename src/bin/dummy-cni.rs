use dummy_cni::{cni::Plugin, ipam::ExecIpam, log::Logging};

const ABOUT_MSG: &str = "dummy-cni plugin delegates address management to an IPAM plugin";
const LOG_FILE_PATH: &str = "/var/log/dummy-cni.log";

fn main() {
    let plugin = Plugin::new(ExecIpam)
        .msg(ABOUT_MSG)
        .logging(Logging::new().file(LOG_FILE_PATH));

    // The error object is already on stdout.
    if plugin.run().is_err() {
        std::process::exit(1);
    }
}
