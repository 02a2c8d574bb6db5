fn main() {
    // configure-wifi bakes these in with option_env!
    println!("cargo:rerun-if-env-changed=WIFI_SSID");
    println!("cargo:rerun-if-env-changed=WIFI_PASSWORD");

    // ESP-IDF build system only for Xtensa targets; build scripts run on the host.
    let is_xtensa = std::env::var("TARGET").is_ok_and(|target| target.contains("xtensa"));
    if is_xtensa {
        embuild::espidf::sysenv::output();
    }
}
