fn main() {
    tunefetch_lib::run()
}
