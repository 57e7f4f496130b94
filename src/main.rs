fn main() {
    #[cfg(not(target_arch = "wasm32"))]
    stable_smoke::start();
}
