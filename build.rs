fn main() {
    // Emits the esp-idf linker/include directives when the ESP build
    // environment is present; harmless no-op on the host.
    embuild::espidf::sysenv::output();
}
